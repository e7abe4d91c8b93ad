//! Engine configuration.
//!
//! A [`Config`] is a typed bag of named options consumed by an engine
//! factory at open time. The recognized names are exposed as constants
//! in [`keys`]; anything else is carried along untouched and silently
//! ignored by engines that do not know it. Missing *required* options
//! surface as `InvalidArgument` when the engine opens.
//!
//! | key                         | type       | effect                                            |
//! |-----------------------------|------------|---------------------------------------------------|
//! | `path`                      | string     | Pool file to create or open.                      |
//! | `size`                      | uint64     | Requested region size when creating.              |
//! | `create_if_missing`         | bool       | Create if absent, open if present.                |
//! | `create_or_error_if_exists` | bool       | Create; fail if the file exists.                  |
//! | `force_create` (deprecated) | bool       | Alias of `create_or_error_if_exists`.             |
//! | `oid`                       | region     | Use an already-mapped [`Region`] as the root.     |
//! | `comparator`                | comparator | Custom key order (ordered engines only).          |
//!
//! At most one of `path` / `oid` may be present. The deprecated alias
//! is accepted, but presenting both spellings with conflicting values
//! is rejected.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use crate::comparator::Comparator;
use crate::region::Region;
use crate::status::{Result, Status, fail};

/// Names of the options recognized by the built-in engines.
pub mod keys {
    /// Filesystem path of the pool file.
    pub const PATH: &str = "path";
    /// Requested region size (bytes) when creating.
    pub const SIZE: &str = "size";
    /// Create the pool if the file is absent, open it if present.
    pub const CREATE_IF_MISSING: &str = "create_if_missing";
    /// Create the pool; fail if the file already exists.
    pub const CREATE_OR_ERROR_IF_EXISTS: &str = "create_or_error_if_exists";
    /// Deprecated alias of [`CREATE_OR_ERROR_IF_EXISTS`].
    pub const FORCE_CREATE: &str = "force_create";
    /// Already-mapped region handle supplied as the root.
    pub const OID: &str = "oid";
    /// Custom comparator object (ordered engines only).
    pub const COMPARATOR: &str = "comparator";
}

/// A single typed option value.
pub enum ConfigValue {
    /// Boolean flag.
    Bool(bool),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// UTF-8 string.
    String(String),
    /// Comparator object, shared with the engine.
    Comparator(Arc<dyn Comparator>),
    /// Pre-mapped region handle (`oid`).
    Region(Region),
}

impl std::fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "Bool({v})"),
            ConfigValue::Uint(v) => write!(f, "Uint({v})"),
            ConfigValue::String(v) => write!(f, "String({v:?})"),
            ConfigValue::Comparator(c) => write!(f, "Comparator({:?})", c.name()),
            ConfigValue::Region(_) => write!(f, "Region(..)"),
        }
    }
}

/// How the pool file is resolved at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenMode {
    /// `create_if_missing`: create on absence, open otherwise.
    CreateIfMissing,
    /// `create_or_error_if_exists` (or the deprecated alias).
    CreateOrErrorIfExists,
    /// Neither creation flag: the file must already exist.
    OpenExisting,
}

/// Typed bag of options consumed by an engine factory.
#[derive(Debug, Default)]
pub struct Config {
    items: HashMap<String, ConfigValue>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    // --------------------------------------------------------------------------------------------
    // Generic surface
    // --------------------------------------------------------------------------------------------

    /// Stores a boolean option under `name`, replacing any previous value.
    pub fn put_bool(mut self, name: impl Into<String>, value: bool) -> Self {
        self.items.insert(name.into(), ConfigValue::Bool(value));
        self
    }

    /// Stores an unsigned integer option under `name`.
    pub fn put_uint(mut self, name: impl Into<String>, value: u64) -> Self {
        self.items.insert(name.into(), ConfigValue::Uint(value));
        self
    }

    /// Stores a string option under `name`.
    pub fn put_string(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.items
            .insert(name.into(), ConfigValue::String(value.into()));
        self
    }

    /// Reads back a boolean option.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.items.get(name) {
            Some(ConfigValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads back an unsigned integer option.
    pub fn get_uint(&self, name: &str) -> Option<u64> {
        match self.items.get(name) {
            Some(ConfigValue::Uint(v)) => Some(*v),
            _ => None,
        }
    }

    /// Reads back a string option.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.items.get(name) {
            Some(ConfigValue::String(v)) => Some(v),
            _ => None,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Recognized options
    // --------------------------------------------------------------------------------------------

    /// Sets the pool file path.
    pub fn put_path(self, path: impl Into<String>) -> Self {
        self.put_string(keys::PATH, path)
    }

    /// Sets the requested region size for creation.
    pub fn put_size(self, size: u64) -> Self {
        self.put_uint(keys::SIZE, size)
    }

    /// Sets the `create_if_missing` flag.
    pub fn put_create_if_missing(self, value: bool) -> Self {
        self.put_bool(keys::CREATE_IF_MISSING, value)
    }

    /// Sets the `create_or_error_if_exists` flag.
    pub fn put_create_or_error_if_exists(self, value: bool) -> Self {
        self.put_bool(keys::CREATE_OR_ERROR_IF_EXISTS, value)
    }

    /// Sets the deprecated `force_create` flag.
    #[deprecated(note = "use `put_create_or_error_if_exists` instead")]
    pub fn put_force_create(self, value: bool) -> Self {
        self.put_bool(keys::FORCE_CREATE, value)
    }

    /// Supplies an already-mapped region as the engine root (`oid`).
    pub fn put_region(mut self, region: Region) -> Self {
        self.items
            .insert(keys::OID.to_string(), ConfigValue::Region(region));
        self
    }

    /// Supplies a custom comparator (ordered engines only).
    pub fn put_comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.items.insert(
            keys::COMPARATOR.to_string(),
            ConfigValue::Comparator(comparator),
        );
        self
    }

    // --------------------------------------------------------------------------------------------
    // Factory-side accessors
    // --------------------------------------------------------------------------------------------

    /// The configured pool path, if any.
    pub(crate) fn path(&self) -> Option<&str> {
        self.get_string(keys::PATH)
    }

    /// The configured creation size, if any.
    pub(crate) fn size(&self) -> Option<u64> {
        self.get_uint(keys::SIZE)
    }

    /// Removes and returns the supplied region handle, if any.
    pub(crate) fn take_region(&mut self) -> Option<Region> {
        match self.items.remove(keys::OID) {
            Some(ConfigValue::Region(region)) => Some(region),
            Some(other) => {
                // Wrong type under "oid": put it back for the error path.
                self.items.insert(keys::OID.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// Returns the supplied comparator, if any.
    pub(crate) fn comparator(&self) -> Option<Arc<dyn Comparator>> {
        match self.items.get(keys::COMPARATOR) {
            Some(ConfigValue::Comparator(c)) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    /// Resolves the open mode from the creation flags.
    ///
    /// The deprecated `force_create` alias is honored; presenting both
    /// spellings with conflicting values is an error.
    pub(crate) fn open_mode(&self) -> Result<OpenMode> {
        let create_or_error = self.get_bool(keys::CREATE_OR_ERROR_IF_EXISTS);
        let force_create = self.get_bool(keys::FORCE_CREATE);

        let create_or_error = match (create_or_error, force_create) {
            (Some(a), Some(b)) if a != b => {
                return Err(fail(
                    Status::InvalidArgument,
                    "\"force_create\" conflicts with \"create_or_error_if_exists\"",
                ));
            }
            (Some(a), _) => a,
            (None, Some(b)) => b,
            (None, None) => false,
        };

        if create_or_error {
            Ok(OpenMode::CreateOrErrorIfExists)
        } else if self.get_bool(keys::CREATE_IF_MISSING).unwrap_or(false) {
            Ok(OpenMode::CreateIfMissing)
        } else {
            Ok(OpenMode::OpenExisting)
        }
    }
}
