#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::status::{Status, last_error};
    use crate::tree3::Tree3Engine;
    use crate::tree3::tests::helpers::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn reverse_comparator_inverts_enumeration() {
        let tmp = TempDir::new().unwrap();
        let engine = open_reverse_engine(&tmp.path().join("pool")).unwrap();

        for key in [b"A".as_slice(), b"AB", b"AC", b"B", b"BB", b"BC"] {
            engine.put(key, key).unwrap();
        }

        let keys: Vec<_> = collect_all(&engine).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![
            b"BC".to_vec(),
            b"BB".to_vec(),
            b"B".to_vec(),
            b"AC".to_vec(),
            b"AB".to_vec(),
            b"A".to_vec(),
        ]);
    }

    #[test]
    fn ordered_queries_follow_the_active_comparator() {
        let tmp = TempDir::new().unwrap();
        let engine = open_reverse_engine(&tmp.path().join("pool")).unwrap();

        for key in [b"A".as_slice(), b"AB", b"AC", b"B", b"BB", b"BC"] {
            engine.put(key, key).unwrap();
        }

        // "Above B" under the reverse order: AC, AB, A.
        assert_eq!(engine.count_above(b"B").unwrap(), 3);
        let above = collect_keys(|v| engine.get_above(b"B", v));
        assert_eq!(above, vec![b"AC".to_vec(), b"AB".to_vec(), b"A".to_vec()]);

        // Under the reverse order "A" is the largest key, so (A, B) is
        // a wrong-way interval and (B, A) is the populated one.
        assert_eq!(engine.count_between(b"A", b"B").unwrap(), 0);
        let forward = collect_keys(|v| engine.get_between(b"B", b"A", v));
        assert_eq!(forward, vec![b"B".to_vec(), b"AC".to_vec(), b"AB".to_vec()]);

        // Range laws hold under any total order.
        for bound in [b"A".as_slice(), b"B", b"BC", b"zz"] {
            assert_eq!(
                engine.count_above(bound).unwrap() + engine.count_equal_below(bound).unwrap(),
                engine.count_all().unwrap(),
            );
        }
    }

    #[test]
    fn reopening_with_a_different_comparator_is_refused() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pool");
        {
            let engine = open_reverse_engine(&path).unwrap();
            engine.put(b"key", b"value").unwrap();
        }

        // Reverse-created pool, default reopen.
        let err = Tree3Engine::open(create_cfg(&path)).unwrap_err();
        assert_eq!(err, Status::ComparatorMismatch);
        assert!(last_error().contains("reverse_lex"));
    }

    #[test]
    fn default_pool_refuses_a_custom_comparator() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pool");
        drop(open_engine(&path));

        let err = open_reverse_engine(&path).unwrap_err();
        assert_eq!(err, Status::ComparatorMismatch);
    }

    #[test]
    fn matching_comparator_reopens_and_keeps_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pool");
        {
            let engine = open_reverse_engine(&path).unwrap();
            for key in [b"A".as_slice(), b"B", b"C"] {
                engine.put(key, key).unwrap();
            }
        }

        let engine = open_reverse_engine(&path).unwrap();
        let keys: Vec<_> = collect_all(&engine).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"C".to_vec(), b"B".to_vec(), b"A".to_vec()]);
    }

    #[test]
    fn stateful_comparator_is_consulted() {
        use std::cmp::Ordering;
        use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

        #[derive(Debug, Default)]
        struct CountingComparator {
            calls: AtomicU64,
        }

        impl crate::comparator::Comparator for CountingComparator {
            fn name(&self) -> &str {
                "counting_lex"
            }

            fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
                self.calls.fetch_add(1, AtomicOrdering::Relaxed);
                a.cmp(b)
            }
        }

        let tmp = TempDir::new().unwrap();
        let comparator = Arc::new(CountingComparator::default());
        let cfg = create_cfg(&tmp.path().join("pool"))
            .put_comparator(Arc::clone(&comparator) as Arc<dyn crate::comparator::Comparator>);
        let engine = Tree3Engine::open(cfg).unwrap();

        engine.put(b"alpha", b"1").unwrap();
        engine.put(b"beta", b"2").unwrap();
        engine.get_vec(b"alpha").unwrap();

        assert!(comparator.calls.load(AtomicOrdering::Relaxed) > 0);
    }
}
