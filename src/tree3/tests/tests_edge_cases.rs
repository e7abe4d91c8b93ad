#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::status::Status;
    use crate::tree3::tests::helpers::*;
    use std::ops::ControlFlow;
    use tempfile::TempDir;

    #[test]
    fn single_byte_keys_across_the_byte_space() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        for b in [0x00u8, 0x01, 0x41, 0x80, 0xFE, 0xFF] {
            engine.put(&[b], &[b, b]).unwrap();
        }

        let keys: Vec<_> = collect_all(&engine).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![
            vec![0x00u8],
            vec![0x01],
            vec![0x41],
            vec![0x80],
            vec![0xFE],
            vec![0xFF],
        ]);
    }

    #[test]
    fn prefix_keys_sort_before_their_extensions() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        for key in [b"aaa".as_slice(), b"aa", b"a", b"aab"] {
            engine.put(key, b"v").unwrap();
        }

        let keys: Vec<_> = collect_all(&engine).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![
            b"a".to_vec(),
            b"aa".to_vec(),
            b"aaa".to_vec(),
            b"aab".to_vec(),
        ]);
    }

    #[test]
    fn remove_reinsert_cycles_in_one_leaf() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        for round in 0..10u32 {
            engine
                .put(b"cycled", format!("round{round}").as_bytes())
                .unwrap();
            assert_eq!(
                engine.get_vec(b"cycled").unwrap(),
                format!("round{round}").as_bytes()
            );
            engine.remove(b"cycled").unwrap();
            assert_eq!(engine.exists(b"cycled").unwrap_err(), Status::NotFound);
        }
        assert_eq!(engine.count_all().unwrap(), 0);
    }

    #[test]
    fn queries_on_an_empty_tree() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        assert_eq!(engine.count_all().unwrap(), 0);
        assert_eq!(engine.count_above(b"x").unwrap(), 0);
        assert_eq!(engine.count_below(b"x").unwrap(), 0);
        assert_eq!(engine.count_between(b"a", b"z").unwrap(), 0);

        let mut visited = 0;
        engine
            .get_all(&mut |_, _| {
                visited += 1;
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(visited, 0);

        let mut it = engine.read_iter().unwrap();
        use crate::iter::ReadIterator;
        assert_eq!(it.seek_to_first().unwrap_err(), Status::NotFound);
        assert_eq!(it.seek_to_last().unwrap_err(), Status::NotFound);
    }

    #[test]
    fn bounds_outside_the_stored_range() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));
        for key in [b"m".as_slice(), b"n", b"o"] {
            engine.put(key, b"v").unwrap();
        }

        assert_eq!(engine.count_above(b"a").unwrap(), 3);
        assert_eq!(engine.count_above(b"z").unwrap(), 0);
        assert_eq!(engine.count_below(b"a").unwrap(), 0);
        assert_eq!(engine.count_below(b"z").unwrap(), 3);
        assert_eq!(engine.count_between(b"a", b"z").unwrap(), 3);
    }

    #[test]
    fn streaming_stops_mid_range_on_break() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));
        for i in 0..20u32 {
            engine.put(format!("k{i:02}").as_bytes(), b"v").unwrap();
        }

        let mut visited = 0;
        let err = engine
            .get_equal_above(b"k05", &mut |_, _| {
                visited += 1;
                if visited == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap_err();
        assert_eq!(err, Status::StoppedByCallback);
        assert_eq!(visited, 3);
    }

    #[test]
    fn values_are_independent_after_leaf_redistribution() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        // Distinct value per key, then enough inserts to split leaves;
        // redistribution must carry each value with its key.
        for i in 0..120u32 {
            engine
                .put(
                    format!("key{i:04}").as_bytes(),
                    format!("payload-{i:04}").as_bytes(),
                )
                .unwrap();
        }
        for i in 0..120u32 {
            assert_eq!(
                engine.get_vec(format!("key{i:04}").as_bytes()).unwrap(),
                format!("payload-{i:04}").as_bytes()
            );
        }
    }

    #[test]
    fn overwrite_during_heavy_interleaving() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        for i in 0..100u32 {
            engine.put(format!("key{i:03}").as_bytes(), b"old").unwrap();
        }
        for i in (0..100u32).step_by(2) {
            engine.put(format!("key{i:03}").as_bytes(), b"new").unwrap();
        }

        for i in 0..100u32 {
            let expected: &[u8] = if i % 2 == 0 { b"new" } else { b"old" };
            assert_eq!(
                engine.get_vec(format!("key{i:03}").as_bytes()).unwrap(),
                expected
            );
        }
        assert_eq!(engine.count_all().unwrap(), 100);
    }
}
