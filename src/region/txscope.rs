//! Ambient persistent-memory transaction scope tracking.
//!
//! Callers embedding the library in an environment with its own
//! persistent-memory transactions (an outer undo-log transaction that
//! could roll library writes back) enter a [`TxScope`] for the
//! duration. Every engine operation checks the thread-local scope at
//! its boundary and refuses with `TransactionScopeError` before any
//! side effect.

use std::cell::Cell;
use std::marker::PhantomData;

use crate::status::{Result, Status, fail};

thread_local! {
    static AMBIENT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII marker for an ambient persistent-memory transaction on the
/// calling thread. Scopes nest; the thread leaves the ambient state
/// when the outermost scope drops.
#[derive(Debug)]
pub struct TxScope {
    // Scope depth is thread-local state; the guard must drop on the
    // thread that created it.
    _not_send: PhantomData<*const ()>,
}

impl TxScope {
    /// Marks the calling thread as inside an ambient transaction.
    #[must_use = "the scope ends when the returned guard is dropped"]
    pub fn enter() -> TxScope {
        AMBIENT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        TxScope {
            _not_send: PhantomData,
        }
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        AMBIENT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// True if the calling thread is inside an ambient transaction.
pub fn active() -> bool {
    AMBIENT_DEPTH.with(Cell::get) > 0
}

/// Boundary check used by every engine operation.
pub(crate) fn check() -> Result<()> {
    if active() {
        Err(fail(
            Status::TransactionScopeError,
            "operation invoked inside an ambient persistent-memory transaction",
        ))
    } else {
        Ok(())
    }
}
