//! Status taxonomy shared by every engine.
//!
//! Every fallible operation on the library boundary returns
//! [`Result<T>`], whose error side is the closed [`Status`] enumeration.
//! A successful call is simply `Ok(..)`; there is no `Ok` variant.
//!
//! Alongside the status kind, a **thread-local last-error string**
//! carries a human-readable diagnostic for the most recent failure on
//! the calling thread. It is overwritten by every new failure and can
//! be read with [`last_error`]. The message text is not part of the
//! stable contract — only the [`Status`] kind is.

#[cfg(test)]
mod tests;

use std::cell::RefCell;

use thiserror::Error;

/// Result alias used on the whole engine boundary.
pub type Result<T> = std::result::Result<T, Status>;

/// Outcome kinds for every library operation other than success.
///
/// The set is closed: engines must map every internal failure onto one
/// of these kinds before it crosses the public boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    /// The requested key (or cursor position) does not exist.
    #[error("element not found")]
    NotFound,

    /// A visitor callback asked to stop the enumeration.
    #[error("iteration stopped by callback")]
    StoppedByCallback,

    /// Failure that fits no other kind (corrupt region, mapping failure).
    #[error("unknown error")]
    UnknownError,

    /// Malformed input or configuration at a call boundary.
    #[error("invalid argument")]
    InvalidArgument,

    /// The value log or an internal allocation is exhausted.
    #[error("out of memory")]
    OutOfMemory,

    /// The region was created by a different engine, or the engine name
    /// is not registered.
    #[error("wrong engine name")]
    WrongEngineName,

    /// A core operation was invoked inside an ambient persistent-memory
    /// transaction started outside the library.
    #[error("operation not permitted inside an active transaction scope")]
    TransactionScopeError,

    /// The engine does not implement this capability.
    #[error("operation not supported")]
    NotSupported,

    /// The region was created under a differently-named comparator.
    #[error("comparator mismatch")]
    ComparatorMismatch,
}

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Returns the diagnostic message recorded by the most recent failure
/// on the calling thread. Empty if no failure has occurred yet.
pub fn last_error() -> String {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Overwrites the thread-local last-error message.
pub(crate) fn set_last_error(msg: impl Into<String>) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = msg.into());
}

/// Records `msg` as the last error and returns `kind`.
///
/// The single construction point for non-OK statuses inside the crate,
/// so that the message and the kind can never drift apart.
pub(crate) fn fail(kind: Status, msg: impl Into<String>) -> Status {
    let msg = msg.into();
    tracing::debug!(status = ?kind, msg = %msg, "operation failed");
    set_last_error(msg);
    kind
}

/// Shorthand for the `NotSupported` capability refusal.
pub(crate) fn unsupported(op: &str) -> Status {
    fail(Status::NotSupported, format!("operation not supported: {op}"))
}
