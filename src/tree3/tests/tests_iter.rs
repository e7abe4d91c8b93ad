#[cfg(test)]
mod tests {
    use crate::engine::{Engine, Transaction};
    use crate::iter::{ReadIterator, WriteIterator};
    use crate::status::Status;
    use crate::tree3::tests::helpers::*;
    use tempfile::TempDir;

    fn seeded_engine(path: &std::path::Path) -> crate::tree3::Tree3Engine {
        let engine = open_engine(path);
        for (key, value) in [
            (b"A".as_slice(), b"value-a".as_slice()),
            (b"B", b"value-b"),
            (b"C", b"value-c"),
            (b"D", b"value-d"),
        ] {
            engine.put(key, value).unwrap();
        }
        engine
    }

    #[test]
    fn forward_walk_matches_get_all() {
        let tmp = TempDir::new().unwrap();
        let engine = seeded_engine(&tmp.path().join("pool"));

        let mut it = engine.read_iter().unwrap();
        it.seek_to_first().unwrap();

        let mut walked = vec![it.key().unwrap().to_vec()];
        while it.is_next() {
            it.next().unwrap();
            walked.push(it.key().unwrap().to_vec());
        }

        let expected: Vec<_> = collect_all(&engine).into_iter().map(|(k, _)| k).collect();
        assert_eq!(walked, expected);
    }

    #[test]
    fn backward_walk_from_last() {
        let tmp = TempDir::new().unwrap();
        let engine = seeded_engine(&tmp.path().join("pool"));

        let mut it = engine.read_iter().unwrap();
        it.seek_to_last().unwrap();
        assert_eq!(it.key().unwrap(), b"D");

        let mut walked = vec![b"D".to_vec()];
        while it.prev().is_ok() {
            walked.push(it.key().unwrap().to_vec());
        }
        assert_eq!(
            walked,
            vec![b"D".to_vec(), b"C".to_vec(), b"B".to_vec(), b"A".to_vec()]
        );
    }

    #[test]
    fn directional_seeks() {
        let tmp = TempDir::new().unwrap();
        let engine = seeded_engine(&tmp.path().join("pool"));
        let mut it = engine.read_iter().unwrap();

        it.seek_higher(b"B").unwrap();
        assert_eq!(it.key().unwrap(), b"C");

        it.seek_higher_eq(b"B").unwrap();
        assert_eq!(it.key().unwrap(), b"B");

        it.seek_lower(b"B").unwrap();
        assert_eq!(it.key().unwrap(), b"A");

        it.seek_lower_eq(b"B").unwrap();
        assert_eq!(it.key().unwrap(), b"B");

        // Seeks between stored keys.
        it.seek_higher(b"BX").unwrap();
        assert_eq!(it.key().unwrap(), b"C");
        it.seek_lower(b"BX").unwrap();
        assert_eq!(it.key().unwrap(), b"B");

        // Out of range.
        assert_eq!(it.seek_higher(b"Z").unwrap_err(), Status::NotFound);
        assert_eq!(it.seek_lower(b"A").unwrap_err(), Status::NotFound);
    }

    #[test]
    fn exact_seek_and_read_range() {
        let tmp = TempDir::new().unwrap();
        let engine = seeded_engine(&tmp.path().join("pool"));
        let mut it = engine.read_iter().unwrap();

        it.seek(b"C").unwrap();
        assert_eq!(it.key().unwrap(), b"C");
        assert_eq!(it.read_range(0, 5).unwrap(), b"value");
        assert_eq!(it.read_range(6, 10).unwrap(), b"c");
        assert_eq!(it.read_range(7, 10).unwrap(), b"");

        assert_eq!(it.seek(b"CX").unwrap_err(), Status::NotFound);
        assert_eq!(it.key().unwrap_err(), Status::InvalidArgument);
    }

    #[test]
    fn write_iterator_commits_staged_ranges() {
        let tmp = TempDir::new().unwrap();
        let mut engine = seeded_engine(&tmp.path().join("pool"));

        {
            let mut it = engine.write_iter().unwrap();
            it.seek(b"B").unwrap();

            let view = it.write_range(0, 2).unwrap();
            view.copy_from_slice(b"bb");

            // Pre-commit reads still see the old bytes.
            assert_eq!(it.read_range(0, 2).unwrap(), b"va");

            it.commit().unwrap();
            assert_eq!(it.read_range(0, 2).unwrap(), b"bb");
        }

        // First two bytes replaced, tail unchanged.
        assert_eq!(engine.get_vec(b"B").unwrap(), b"bblue-b");
    }

    #[test]
    fn write_iterator_abort_discards_edits() {
        let tmp = TempDir::new().unwrap();
        let mut engine = seeded_engine(&tmp.path().join("pool"));

        {
            let mut it = engine.write_iter().unwrap();
            it.seek(b"B").unwrap();
            it.write_range(0, 5).unwrap().copy_from_slice(b"XXXXX");
            it.abort();
            it.commit().unwrap(); // empty log, no-op
        }
        assert_eq!(engine.get_vec(b"B").unwrap(), b"value-b");
    }

    #[test]
    fn seek_with_staged_edits_aborts_them() {
        let tmp = TempDir::new().unwrap();
        let mut engine = seeded_engine(&tmp.path().join("pool"));

        {
            let mut it = engine.write_iter().unwrap();
            it.seek(b"B").unwrap();
            it.write_range(0, 5).unwrap().copy_from_slice(b"XXXXX");

            // Repositioning silently drops the staged log.
            it.seek(b"C").unwrap();
            it.commit().unwrap();
        }
        assert_eq!(engine.get_vec(b"B").unwrap(), b"value-b");
        assert_eq!(engine.get_vec(b"C").unwrap(), b"value-c");
    }

    #[test]
    fn multiple_ranges_commit_in_order() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open_engine(&tmp.path().join("pool"));
        engine.put(b"key", b"0123456789").unwrap();

        {
            let mut it = engine.write_iter().unwrap();
            it.seek(b"key").unwrap();
            it.write_range(0, 3).unwrap().copy_from_slice(b"abc");
            it.write_range(7, 3).unwrap().copy_from_slice(b"xyz");
            it.commit().unwrap();
        }
        assert_eq!(engine.get_vec(b"key").unwrap(), b"abc3456xyz");
    }

    #[test]
    fn write_range_clamps_to_the_value() {
        let tmp = TempDir::new().unwrap();
        let mut engine = open_engine(&tmp.path().join("pool"));
        engine.put(b"key", b"short").unwrap();

        let mut it = engine.write_iter().unwrap();
        it.seek(b"key").unwrap();
        assert_eq!(it.write_range(3, 100).unwrap().len(), 2);
        assert_eq!(it.write_range(50, 4).unwrap().len(), 0);
    }

    #[test]
    fn read_iterator_sees_pre_commit_state() {
        let tmp = TempDir::new().unwrap();
        let engine = seeded_engine(&tmp.path().join("pool"));

        // A read cursor created before a later write sees whatever is
        // published at access time; staged (uncommitted) edits from a
        // transaction are never visible.
        let mut tx = engine.tx_begin().unwrap();
        tx.put(b"B", b"staged!").unwrap();

        let mut it = engine.read_iter().unwrap();
        it.seek(b"B").unwrap();
        assert_eq!(it.read_range(0, 7).unwrap(), b"value-b");

        tx.commit().unwrap();
        let mut it2 = engine.read_iter().unwrap();
        it2.seek(b"B").unwrap();
        assert_eq!(it2.read_range(0, 7).unwrap(), b"staged!");
    }
}
