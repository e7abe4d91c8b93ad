//! Named three-way key orderings for ordered engines.
//!
//! A comparator defines a **total order** over opaque byte-string keys:
//! reflexive, antisymmetric, transitive, and total under three-way
//! semantics. Ordered engines call it from multiple reader threads
//! concurrently, so implementations must be `Send + Sync`; captured
//! state is owned by the comparator object itself.
//!
//! The comparator's [`name`](Comparator::name) is persisted in the
//! region header at create time. Reopening a pool with a comparator
//! whose name differs — in either direction, default against custom
//! included — fails with `ComparatorMismatch` before any key is read,
//! because the on-media leaf order would be meaningless under a
//! different order.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::sync::Arc;

/// Reserved name of the default byte-lexicographic comparator.
pub const BINARY_COMPARATOR_NAME: &str = "__pmemkv_binary_comparator";

/// A named total order over byte-string keys.
pub trait Comparator: Send + Sync {
    /// Stable identifier, persisted with every pool created under this
    /// order.
    fn name(&self) -> &str;

    /// Three-way comparison of two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// The default comparator: lexicographic order on raw bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryComparator;

impl Comparator for BinaryComparator {
    fn name(&self) -> &str {
        BINARY_COMPARATOR_NAME
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Shared handle to the default comparator.
pub(crate) fn default_comparator() -> Arc<dyn Comparator> {
    Arc::new(BinaryComparator)
}
