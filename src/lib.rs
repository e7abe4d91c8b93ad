//! # nvkv
//!
//! An embeddable key-value storage library for **byte-addressable
//! non-volatile memory** (or a memory-mapped file emulating it), with
//! pluggable persistent engines selected by name at open time.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  open(name, config)                                       │
//! │        │                                                  │
//! │  ┌─────▼──────┐   ┌───────────────┐   ┌────────────────┐  │
//! │  │  registry  │──►│  Engine trait │◄──│  Comparator    │  │
//! │  └────────────┘   └──────┬────────┘   └────────────────┘  │
//! │              ┌───────────┴───────────┐                    │
//! │       ┌──────▼──────┐         ┌──────▼──────┐             │
//! │       │    fmap     │         │    tree3    │             │
//! │       │ hash-indexed│         │   hybrid    │             │
//! │       │  value log  │         │   B+-tree   │             │
//! │       └──────┬──────┘         └──────┬──────┘             │
//! │              └───────────┬───────────┘                    │
//! │                   ┌──────▼──────┐                         │
//! │                   │   Region    │  mapped pool file       │
//! │                   └─────────────┘                         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Engine contract, by-name registry, transactions |
//! | [`fmap`] | Unordered, concurrent hash-indexed log store |
//! | [`tree3`] | Ordered hybrid B+-tree with crash-repaired splits |
//! | [`iter`] | Read / write cursor capability traits |
//! | [`region`] | Persistent-memory substrate and transaction scope |
//! | [`config`] | Typed name→value option bag consumed at open |
//! | [`comparator`] | Named three-way key orderings |
//! | [`status`] | Status taxonomy and thread-local last error |
//! | [`encoding`] | Byte-stable encoding for persisted metadata |
//!
//! ## Key properties
//!
//! - **One contract, many layouts** — every backend implements the
//!   same [`Engine`] trait; unsupported capabilities answer
//!   `NotSupported` instead of diverging.
//! - **Crash consistency by publish points** — each mutation becomes
//!   visible through a single small persisted store (an 8-byte index
//!   meta for `fmap`, a 1-byte index flip for `tree3`), with all
//!   payload bytes persisted before it. Reopen lands on the pre- or
//!   post-operation state, never in between.
//! - **Zero-copy reads** — `get` and the enumeration family hand out
//!   byte views whose validity is bounded by the callback, enforced by
//!   lifetime.
//! - **Comparator persistence** — ordered pools remember the name of
//!   the order they were created under and refuse to reopen under a
//!   different one.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use nvkv::{Config, Engine, Status};
//!
//! let cfg = Config::new()
//!     .put_path("/tmp/example-pool")
//!     .put_size(1 << 24)
//!     .put_create_if_missing(true);
//! let kv = nvkv::open("tree3", cfg)?;
//!
//! kv.put(b"key1", b"value1")?;
//! assert_eq!(kv.get_vec(b"key1")?, b"value1");
//! assert_eq!(kv.count_all()?, 1);
//!
//! kv.remove(b"key1")?;
//! assert_eq!(kv.exists(b"key1"), Err(Status::NotFound));
//! # Ok::<(), Status>(())
//! ```

pub mod comparator;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod fmap;
pub mod iter;
pub mod region;
pub mod status;
pub mod tree3;

pub use comparator::{BinaryComparator, Comparator};
pub use config::Config;
pub use engine::{Engine, Transaction, ValueSink, Visitor, engine_names, open, register_engine};
pub use iter::{ReadIterator, WriteIterator};
pub use region::txscope::TxScope;
pub use status::{Result, Status, last_error};
