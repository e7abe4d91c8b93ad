#[cfg(test)]
mod tests {
    use crate::engine::{Engine, Transaction};
    use crate::status::Status;
    use crate::tree3::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn staged_mutations_are_invisible_until_commit() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));
        engine.put(b"existing", b"old").unwrap();

        let mut tx = engine.tx_begin().unwrap();
        tx.put(b"existing", b"new").unwrap();
        tx.put(b"added", b"value").unwrap();
        tx.remove(b"existing").unwrap();

        assert_eq!(engine.get_vec(b"existing").unwrap(), b"old");
        assert_eq!(engine.exists(b"added").unwrap_err(), Status::NotFound);
        assert_eq!(engine.count_all().unwrap(), 1);

        tx.commit().unwrap();

        assert_eq!(engine.exists(b"existing").unwrap_err(), Status::NotFound);
        assert_eq!(engine.get_vec(b"added").unwrap(), b"value");
        assert_eq!(engine.count_all().unwrap(), 1);
    }

    #[test]
    fn batch_applies_in_staging_order() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        let mut tx = engine.tx_begin().unwrap();
        tx.put(b"key", b"first").unwrap();
        tx.put(b"key", b"second").unwrap();
        tx.remove(b"key").unwrap();
        tx.put(b"key", b"final").unwrap();
        tx.commit().unwrap();

        assert_eq!(engine.get_vec(b"key").unwrap(), b"final");
    }

    #[test]
    fn end_discards_the_batch() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        let mut tx = engine.tx_begin().unwrap();
        tx.put(b"ghost", b"v").unwrap();
        tx.end();

        assert_eq!(engine.count_all().unwrap(), 0);
        assert_eq!(tx.put(b"more", b"v").unwrap_err(), Status::InvalidArgument);
    }

    #[test]
    fn dropping_the_handle_discards_the_batch() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        {
            let mut tx = engine.tx_begin().unwrap();
            tx.put(b"ghost", b"v").unwrap();
        }
        assert_eq!(engine.count_all().unwrap(), 0);
    }

    #[test]
    fn handle_is_single_shot_after_commit() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        let mut tx = engine.tx_begin().unwrap();
        tx.put(b"key", b"v").unwrap();
        tx.commit().unwrap();

        assert_eq!(tx.put(b"key2", b"w").unwrap_err(), Status::InvalidArgument);
        assert_eq!(tx.commit().unwrap_err(), Status::InvalidArgument);
    }

    #[test]
    fn committed_batch_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pool");
        {
            let engine = open_engine(&path);
            let mut tx = engine.tx_begin().unwrap();
            for i in 0..80u32 {
                tx.put(format!("key{i:03}").as_bytes(), format!("v{i}").as_bytes())
                    .unwrap();
            }
            tx.commit().unwrap();
        }

        let engine = open_engine(&path);
        assert_eq!(engine.count_all().unwrap(), 80);
        let keys: Vec<_> = collect_all(&engine).into_iter().map(|(k, _)| k).collect();
        let expected: Vec<_> = (0..80u32)
            .map(|i| format!("key{i:03}").into_bytes())
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn staged_arguments_are_validated_eagerly() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        let mut tx = engine.tx_begin().unwrap();
        assert_eq!(tx.put(b"", b"v").unwrap_err(), Status::InvalidArgument);
        assert_eq!(
            tx.put(b"key", &vec![0u8; 500]).unwrap_err(),
            Status::InvalidArgument
        );
        assert_eq!(
            tx.remove(&vec![b'x'; 30]).unwrap_err(),
            Status::InvalidArgument
        );
    }
}
