//! Engine contract and by-name registry.
//!
//! Every storage backend implements the [`Engine`] trait — one uniform
//! operation surface over heterogeneous layouts. A backend that lacks
//! a capability (range queries on an unordered engine, a write cursor
//! over immutable log values) inherits the default `NotSupported`
//! bodies instead of inventing partial behavior.
//!
//! Engines are selected **by name** at open time: [`open`] looks the
//! name up in a process-wide registry of factories and hands the
//! validated [`Config`] to the matching constructor. The two built-in
//! persistent engines are registered on first use:
//!
//! | name    | layout                 | ordered |
//! |---------|------------------------|---------|
//! | `fmap`  | hash-indexed value log | no      |
//! | `tree3` | hybrid B+-tree         | yes     |
//!
//! # Callbacks and views
//!
//! [`Engine::get`] and the enumeration family hand the caller byte
//! views that are valid **only for the duration of the callback**; the
//! borrow ends when the callback returns, which the signatures enforce
//! by lifetime rather than by convention. A visitor stops an
//! enumeration early by returning `ControlFlow::Break`, which
//! surfaces as `StoppedByCallback`.
//!
//! # Transactions
//!
//! [`Engine::tx_begin`] returns a [`Transaction`] handle that stages
//! `put` / `remove` operations. Staged mutations are invisible to
//! concurrent readers of the engine until [`Transaction::commit`];
//! dropping the handle (or calling [`Transaction::end`]) discards
//! them. Handles are single-shot: any use after commit or end fails
//! with `InvalidArgument`.


use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::info;

use crate::config::Config;
use crate::iter::{ReadIterator, WriteIterator};
use crate::region::txscope;
use crate::status::{Result, Status, fail, unsupported};

/// Per-pair visitor for the enumeration family. Return
/// `ControlFlow::Break(())` to stop the walk.
pub type Visitor<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>;

/// Value sink for [`Engine::get`]. The view is valid only inside the
/// call.
pub type ValueSink<'a> = &'a mut dyn FnMut(&[u8]);

/// A staged batch of mutations against one engine instance.
pub trait Transaction {
    /// Stages an insert-or-overwrite of `key`.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Stages a removal of `key`.
    fn remove(&mut self, key: &[u8]) -> Result<()>;

    /// Applies the staged batch. The handle is spent afterwards.
    fn commit(&mut self) -> Result<()>;

    /// Discards the staged batch. The handle is spent afterwards.
    fn end(&mut self);
}

/// The uniform operation surface shared by all storage backends.
pub trait Engine: Send + Sync {
    /// Stable engine identifier (the name it registers under).
    fn name(&self) -> &'static str;

    /// `Ok` if `key` is present, `NotFound` otherwise.
    fn exists(&self, key: &[u8]) -> Result<()>;

    /// Invokes `sink` exactly once with the value of `key`, or returns
    /// `NotFound`. The view is valid only for the duration of the
    /// callback.
    fn get(&self, key: &[u8], sink: ValueSink<'_>) -> Result<()>;

    /// Copying convenience over [`Engine::get`].
    fn get_vec(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.get(key, &mut |value| out.extend_from_slice(value))?;
        Ok(out)
    }

    /// Inserts or overwrites `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key`; `NotFound` if it was absent.
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Number of live records.
    fn count_all(&self) -> Result<usize>;

    /// Visits every `(key, value)` pair in the engine's order.
    fn get_all(&self, visitor: Visitor<'_>) -> Result<()>;

    // --------------------------------------------------------------------------------------------
    // Ordered family — NotSupported unless the engine is ordered
    // --------------------------------------------------------------------------------------------

    /// Number of keys strictly above `key` under the engine comparator.
    fn count_above(&self, key: &[u8]) -> Result<usize> {
        let _ = key;
        Err(unsupported("count_above"))
    }

    /// Number of keys at or above `key`.
    fn count_equal_above(&self, key: &[u8]) -> Result<usize> {
        let _ = key;
        Err(unsupported("count_equal_above"))
    }

    /// Number of keys strictly below `key`.
    fn count_below(&self, key: &[u8]) -> Result<usize> {
        let _ = key;
        Err(unsupported("count_below"))
    }

    /// Number of keys at or below `key`.
    fn count_equal_below(&self, key: &[u8]) -> Result<usize> {
        let _ = key;
        Err(unsupported("count_equal_below"))
    }

    /// Number of keys in `[a, b)`; zero unless `a < b`.
    fn count_between(&self, a: &[u8], b: &[u8]) -> Result<usize> {
        let _ = (a, b);
        Err(unsupported("count_between"))
    }

    /// Visits keys strictly above `key`, ascending.
    fn get_above(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        let _ = (key, visitor);
        Err(unsupported("get_above"))
    }

    /// Visits keys at or above `key`, ascending.
    fn get_equal_above(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        let _ = (key, visitor);
        Err(unsupported("get_equal_above"))
    }

    /// Visits keys strictly below `key`, ascending.
    fn get_below(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        let _ = (key, visitor);
        Err(unsupported("get_below"))
    }

    /// Visits keys at or below `key`, ascending.
    fn get_equal_below(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        let _ = (key, visitor);
        Err(unsupported("get_equal_below"))
    }

    /// Visits keys in `[a, b)`, ascending; empty unless `a < b`.
    fn get_between(&self, a: &[u8], b: &[u8], visitor: Visitor<'_>) -> Result<()> {
        let _ = (a, b, visitor);
        Err(unsupported("get_between"))
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance, transactions, cursors
    // --------------------------------------------------------------------------------------------

    /// Defragmentation hint over the `[start_pct, end_pct]` slice of
    /// the key space. Best-effort; engines may treat it as a no-op.
    fn defrag(&self, start_pct: u32, end_pct: u32) -> Result<()> {
        if start_pct > 100 || end_pct > 100 || start_pct > end_pct {
            return Err(fail(
                Status::InvalidArgument,
                format!("invalid defrag range: {start_pct}..{end_pct}"),
            ));
        }
        Ok(())
    }

    /// Begins a staged transaction on this engine instance.
    fn tx_begin(&self) -> Result<Box<dyn Transaction + '_>>;

    /// Creates a read cursor (shared borrow of the engine).
    fn read_iter(&self) -> Result<Box<dyn ReadIterator + '_>>;

    /// Creates a write cursor (exclusive borrow of the engine).
    fn write_iter(&mut self) -> Result<Box<dyn WriteIterator + '_>> {
        Err(unsupported("write_iter"))
    }
}

impl std::fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Engine").field(&self.name()).finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Registry
// ------------------------------------------------------------------------------------------------

/// Constructor signature stored in the registry.
pub type EngineFactory = fn(Config) -> Result<Box<dyn Engine>>;

static REGISTRY: Lazy<RwLock<HashMap<&'static str, EngineFactory>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, EngineFactory> = HashMap::new();
    map.insert(crate::fmap::ENGINE_NAME, crate::fmap::factory);
    map.insert(crate::tree3::ENGINE_NAME, crate::tree3::factory);
    RwLock::new(map)
});

/// Registers an additional engine factory under `name`.
///
/// Fails with `InvalidArgument` if the name is already taken.
pub fn register_engine(name: &'static str, factory: EngineFactory) -> Result<()> {
    let mut registry = REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    if registry.contains_key(name) {
        return Err(fail(
            Status::InvalidArgument,
            format!("engine \"{name}\" is already registered"),
        ));
    }
    registry.insert(name, factory);
    Ok(())
}

/// Names of all registered engines, sorted.
pub fn engine_names() -> Vec<&'static str> {
    let registry = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
    let mut names: Vec<_> = registry.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Opens the engine registered under `name` with the given
/// configuration.
///
/// Unknown names fail with `WrongEngineName`; everything else is up to
/// the engine factory (missing options, layout or comparator mismatch,
/// mapping failures).
pub fn open(name: &str, cfg: Config) -> Result<Box<dyn Engine>> {
    txscope::check()?;

    let factory = {
        let registry = REGISTRY.read().unwrap_or_else(|e| e.into_inner());
        registry.get(name).copied()
    };
    let Some(factory) = factory else {
        return Err(fail(
            Status::WrongEngineName,
            format!(
                "unknown engine \"{name}\" (registered: {})",
                engine_names().join(", ")
            ),
        ));
    };

    let engine = factory(cfg)?;
    info!(engine = name, "engine opened");
    Ok(engine)
}
