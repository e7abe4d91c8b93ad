#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::fmap::FmapEngine;
    use crate::fmap::tests::helpers::*;
    use crate::status::Status;
    use std::ops::ControlFlow;
    use tempfile::TempDir;

    /// A minimum-size pool has few head buckets, so a few hundred keys
    /// force bucket chains into the spare arena.
    #[test]
    fn bucket_overflow_chains_into_spare_arena() {
        let tmp = TempDir::new().unwrap();
        let engine = FmapEngine::open(tiny_cfg(&tmp.path().join("pool"))).unwrap();

        for i in 0..300 {
            engine.put(&key16(i), format!("v{i}").as_bytes()).unwrap();
        }

        assert_eq!(engine.count_all().unwrap(), 300);
        for i in 0..300 {
            assert_eq!(engine.get_vec(&key16(i)).unwrap(), format!("v{i}").as_bytes());
        }
    }

    #[test]
    fn chained_entries_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pool");
        {
            let engine = FmapEngine::open(tiny_cfg(&path)).unwrap();
            for i in 0..300 {
                engine.put(&key16(i), b"chained").unwrap();
            }
        }

        let engine = FmapEngine::open(tiny_cfg(&path)).unwrap();
        assert_eq!(engine.count_all().unwrap(), 300);
        assert_eq!(engine.get_vec(&key16(299)).unwrap(), b"chained");
    }

    #[test]
    fn hot_key_cache_tracks_overwrites() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        // Repeated get/put of the same key exercises the per-slot
        // cache; stale cached locations must never serve stale values.
        for round in 0..50 {
            let value = format!("round{round}");
            engine.put(&key16(1), value.as_bytes()).unwrap();
            assert_eq!(engine.get_vec(&key16(1)).unwrap(), value.as_bytes());
        }
    }

    #[test]
    fn interleaved_keys_do_not_alias() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        // Values of different block spans force free-list class mixing.
        let small = vec![0x11u8; 8];
        let large = vec![0x22u8; 900];
        for i in 0..40 {
            let value = if i % 2 == 0 { &small } else { &large };
            engine.put(&key16(i), value).unwrap();
        }
        for i in 0..40 {
            engine.remove(&key16(i)).unwrap();
        }
        for i in 0..40 {
            // Reversed sizes, landing in the other free-list class.
            let value = if i % 2 == 0 { &large } else { &small };
            engine.put(&key16(i), value).unwrap();
        }

        for i in 0..40 {
            let expected = if i % 2 == 0 { &large } else { &small };
            assert_eq!(&engine.get_vec(&key16(i)).unwrap(), expected);
        }
    }

    #[test]
    fn get_all_on_empty_engine_visits_nothing() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        let mut visited = 0;
        engine
            .get_all(&mut |_, _| {
                visited += 1;
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(visited, 0);
    }

    #[test]
    fn remove_all_then_reuse_the_whole_pool() {
        let tmp = TempDir::new().unwrap();
        let engine = open_engine(&tmp.path().join("pool"));

        for round in 0..3 {
            for i in 0..100 {
                engine
                    .put(&key16(i), format!("r{round}").as_bytes())
                    .unwrap();
            }
            assert_eq!(engine.count_all().unwrap(), 100);
            for i in 0..100 {
                engine.remove(&key16(i)).unwrap();
            }
            assert_eq!(engine.count_all().unwrap(), 0);
        }
    }

    #[test]
    fn tombstone_then_reopen_then_reinsert() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pool");
        {
            let engine = open_engine(&path);
            engine.put(&key16(1), b"first life").unwrap();
            engine.remove(&key16(1)).unwrap();
        }
        {
            let engine = open_engine(&path);
            assert_eq!(engine.exists(&key16(1)).unwrap_err(), Status::NotFound);
            engine.put(&key16(1), b"second life").unwrap();
        }

        let engine = open_engine(&path);
        assert_eq!(engine.get_vec(&key16(1)).unwrap(), b"second life");
        assert_eq!(engine.count_all().unwrap(), 1);
    }
}
