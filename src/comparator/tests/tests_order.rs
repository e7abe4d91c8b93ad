#[cfg(test)]
mod tests {
    use crate::comparator::{BINARY_COMPARATOR_NAME, BinaryComparator, Comparator};
    use std::cmp::Ordering;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    #[test]
    fn binary_comparator_is_lexicographic() {
        let cmp = BinaryComparator;
        assert_eq!(cmp.compare(b"A", b"B"), Ordering::Less);
        assert_eq!(cmp.compare(b"B", b"A"), Ordering::Greater);
        assert_eq!(cmp.compare(b"AB", b"AB"), Ordering::Equal);
        // Prefix sorts first.
        assert_eq!(cmp.compare(b"A", b"AB"), Ordering::Less);
        // Raw byte order, not ASCII-case order.
        assert_eq!(cmp.compare(&[0x00], &[0xFF]), Ordering::Less);
    }

    #[test]
    fn binary_comparator_has_the_reserved_name() {
        assert_eq!(BinaryComparator.name(), BINARY_COMPARATOR_NAME);
    }

    /// Comparators may carry captured state; the trait requires only
    /// `Send + Sync`.
    struct CountingComparator {
        calls: AtomicU64,
    }

    impl Comparator for CountingComparator {
        fn name(&self) -> &str {
            "counting"
        }

        fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
            self.calls.fetch_add(1, AtomicOrdering::Relaxed);
            b.cmp(a)
        }
    }

    #[test]
    fn stateful_comparator_observes_calls() {
        let cmp = CountingComparator {
            calls: AtomicU64::new(0),
        };
        assert_eq!(cmp.compare(b"A", b"B"), Ordering::Greater);
        assert_eq!(cmp.compare(b"B", b"A"), Ordering::Less);
        assert_eq!(cmp.calls.load(AtomicOrdering::Relaxed), 2);
    }

    #[test]
    fn comparators_are_shareable_across_threads() {
        let cmp = std::sync::Arc::new(CountingComparator {
            calls: AtomicU64::new(0),
        });
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cmp = std::sync::Arc::clone(&cmp);
                std::thread::spawn(move || {
                    assert_eq!(cmp.compare(b"x", b"y"), Ordering::Greater);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cmp.calls.load(AtomicOrdering::Relaxed), 4);
    }
}
