//! Read and write cursors over engine contents.
//!
//! A cursor owns a position inside its engine and hands out byte views
//! of the current key and value. Lifetimes are strictly nested within
//! the owning engine: a read cursor borrows the engine shared, a write
//! cursor borrows it **exclusively** (see
//! [`Engine::write_iter`](crate::engine::Engine::write_iter)), so the
//! borrow checker rules out a read cursor alongside a live write
//! cursor on the same engine.
//!
//! The base capability set is `seek` / `key` / `read_range` / `next` /
//! `is_next`. Ordered, bidirectional engines add the `seek_*`
//! relatives and `prev`; engines without those capabilities inherit
//! the default `NotSupported` bodies. Write cursors stage byte-range
//! mutations in a per-cursor log and apply them atomically on
//! [`commit`](WriteIterator::commit):
//!
//! - [`write_range`](WriteIterator::write_range) returns a writable
//!   view of a range of the current value; the edit lands in the
//!   staging log, not in the engine.
//! - [`read_range`](ReadIterator::read_range) keeps returning the
//!   **pre-commit** bytes while edits are staged.
//! - any `seek*` with a non-empty log aborts the staged edits first.

use crate::status::{Result, unsupported};

/// A shared-borrow cursor for reading engine contents.
///
/// A freshly created cursor is **unpositioned**: `key` and
/// `read_range` fail until a `seek*` or `next` succeeds.
pub trait ReadIterator {
    /// Positions the cursor at exactly `key`. `NotFound` leaves the
    /// cursor unpositioned.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    /// Positions at the greatest element strictly below `key`
    /// (ordered engines only).
    fn seek_lower(&mut self, key: &[u8]) -> Result<()> {
        let _ = key;
        Err(unsupported("seek_lower"))
    }

    /// Positions at the greatest element at or below `key`
    /// (ordered engines only).
    fn seek_lower_eq(&mut self, key: &[u8]) -> Result<()> {
        let _ = key;
        Err(unsupported("seek_lower_eq"))
    }

    /// Positions at the least element strictly above `key`
    /// (ordered engines only).
    fn seek_higher(&mut self, key: &[u8]) -> Result<()> {
        let _ = key;
        Err(unsupported("seek_higher"))
    }

    /// Positions at the least element at or above `key`
    /// (ordered engines only).
    fn seek_higher_eq(&mut self, key: &[u8]) -> Result<()> {
        let _ = key;
        Err(unsupported("seek_higher_eq"))
    }

    /// Positions at the first element in the engine's order.
    fn seek_to_first(&mut self) -> Result<()> {
        Err(unsupported("seek_to_first"))
    }

    /// Positions at the last element (bidirectional engines only).
    fn seek_to_last(&mut self) -> Result<()> {
        Err(unsupported("seek_to_last"))
    }

    /// Advances to the following element in the engine's order.
    /// `NotFound` past the end; the position is then lost.
    fn next(&mut self) -> Result<()>;

    /// Steps back to the preceding element (bidirectional engines only).
    fn prev(&mut self) -> Result<()> {
        Err(unsupported("prev"))
    }

    /// True iff an element follows the current position.
    fn is_next(&self) -> bool;

    /// Borrowed view of the current key. `InvalidArgument` if the
    /// cursor is unpositioned.
    fn key(&self) -> Result<&[u8]>;

    /// Borrowed view of bytes `[pos, min(pos + n, len))` of the current
    /// value; zero-sized when `pos >= len`. `InvalidArgument` if the
    /// cursor is unpositioned.
    fn read_range(&self, pos: usize, n: usize) -> Result<&[u8]>;
}

/// An exclusive-borrow cursor that can mutate the current value in
/// place, under a commit/abort protocol.
pub trait WriteIterator: ReadIterator {
    /// Returns a writable view of bytes `[pos, min(pos + n, len))` of
    /// the current value, staged in the cursor's mutation log. The
    /// view is pre-filled with the current (pre-commit) bytes.
    fn write_range(&mut self, pos: usize, n: usize) -> Result<&mut [u8]>;

    /// Applies the staged mutation log to the underlying value
    /// atomically, then clears the log.
    fn commit(&mut self) -> Result<()>;

    /// Discards the staged mutation log.
    fn abort(&mut self);
}

impl std::fmt::Debug for dyn WriteIterator + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteIterator").finish_non_exhaustive()
    }
}
