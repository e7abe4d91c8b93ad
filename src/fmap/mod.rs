//! `fmap` — the hash-indexed log store.
//!
//! An **unordered**, crash-consistent engine for fixed-width 16-byte
//! keys and values up to 1 KiB, tuned for concurrent multi-threaded
//! writes and fast restart.
//!
//! ## Design
//!
//! - **Persistent side** ([`log`]): the region payload is a value log
//!   split into 16 writer shards. Records are self-describing
//!   (`meta | key | value`, zero-padded to 32-byte blocks) and never
//!   mutated in place; an overwrite allocates a fresh block and frees
//!   the old one.
//! - **Volatile side** ([`index`]): a DRAM hash table rebuilt on every
//!   open, mapping keys to an 8-byte packed meta. The release store of
//!   that word is the **publish point**: the record is fully persisted
//!   before it, so readers see either the old value or the new one,
//!   never a torn intermediate.
//! - **Reads are lock-free.** A reader copies the value bytes and then
//!   re-reads the published meta behind an acquire fence; if it moved,
//!   the copy may have raced a block reuse and the read is retried
//!   from the new meta.
//! - **Writers** serialize per hash slot on a spin lock; block
//!   allocation is shard-local and never taken under the slot lock.
//!   Each writing thread is assigned a shard on its first write
//!   through an engine-local counter.
//! - **Removal** appends a persisted tombstone record carrying the
//!   key's next version, so recovery replays deletes exactly like
//!   overwrites.
//!
//! ## Recovery
//!
//! Each shard's log is scanned from offset zero. An all-zero record
//! meta ends the shard; a checksum mismatch marks a torn tail and the
//! block is skipped. When several records carry the same key, the
//! highest (wrap-aware) version wins, which makes the rebuilt index
//! agree with the last published state.
//!
//! ## Capability surface
//!
//! The ordered query family and the write cursor are `NotSupported`:
//! the hash gives no order, and log values are immutable in place.

pub mod index;
pub mod log;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{self, AtomicU32, AtomicU64, Ordering};

use tracing::{debug, info, warn};
use xxhash_rust::xxh64::xxh64;

use crate::config::Config;
use crate::engine::{Engine, Transaction, ValueSink, Visitor};
use crate::iter::ReadIterator;
use crate::region::{self, Region, txscope};
use crate::status::{Result, Status, fail};

use index::{HashIndex, HashMeta, SlotSearch, version_newer};
use log::{
    KEY_SIZE, MAX_BLOCK_SPAN, MAX_VALUE_SIZE, RECORD_META_SIZE, RecordMeta, SHARDS,
    TOMBSTONE_VALUE_SIZE, ValueLog,
};

/// Registry name of this engine.
pub const ENGINE_NAME: &str = "fmap";

/// Smallest accepted pool: leaves every shard at least a handful of
/// maximum-span records.
const MIN_POOL_SIZE: u64 = 64 * 1024;

/// Registry factory.
pub(crate) fn factory(cfg: Config) -> Result<Box<dyn Engine>> {
    Ok(Box::new(FmapEngine::open(cfg)?))
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Writer-shard assignment per engine instance on this thread.
    static WRITER_SHARDS: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

/// The hash-indexed log store.
pub struct FmapEngine {
    region: Region,
    index: HashIndex,
    log: ValueLog,
    /// Live (non-tombstone) record count.
    live: AtomicU64,
    /// Writer-class counter; a thread takes `counter % SHARDS` on its
    /// first write through this instance.
    next_writer: AtomicU32,
    instance: u64,
}

impl FmapEngine {
    /// Opens (or creates) an `fmap` pool from the configuration.
    pub fn open(mut cfg: Config) -> Result<Self> {
        txscope::check()?;
        let region = region::open_from_config(&mut cfg, ENGINE_NAME, "", MIN_POOL_SIZE)?;

        let payload_len = region.payload_len();
        let bucket_count = (payload_len / 512).next_power_of_two().clamp(64, 1 << 22);
        let spare_per_shard = (bucket_count / (2 * SHARDS)).max(1) as u32;

        let mut engine = Self {
            index: HashIndex::new(bucket_count, spare_per_shard),
            log: ValueLog::new(payload_len),
            live: AtomicU64::new(0),
            next_writer: AtomicU32::new(0),
            instance: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            region,
        };

        if !engine.region.is_new() {
            engine.recover()?;
        }
        debug!(
            bucket_count,
            shard_blocks = engine.log.shard_blocks(),
            "fmap engine ready"
        );
        Ok(engine)
    }

    fn writer_shard(&self) -> usize {
        WRITER_SHARDS.with(|map| {
            *map.borrow_mut().entry(self.instance).or_insert_with(|| {
                self.next_writer.fetch_add(1, Ordering::Relaxed) as usize % SHARDS
            })
        })
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.len() != KEY_SIZE {
            return Err(fail(
                Status::InvalidArgument,
                format!("fmap keys must be exactly {KEY_SIZE} bytes, got {}", key.len()),
            ));
        }
        Ok(())
    }

    /// Copies the current value of `entry` with the re-read guard.
    ///
    /// Returns `None` for an empty or tombstone meta. On return the
    /// buffer holds a consistent value: the meta was re-read behind an
    /// acquire fence after the copy and had not moved.
    fn read_entry_value(&self, entry: &index::HashEntry, buf: &mut Vec<u8>) -> Option<HashMeta> {
        let mut packed = entry.load_meta();
        loop {
            let meta = HashMeta::decode(packed)?;
            if meta.is_tombstone() {
                return None;
            }
            log::read_value(&self.region, meta.block_off, meta.value_size as usize, buf);
            atomic::fence(Ordering::Acquire);
            let reread = entry.load_meta();
            if reread == packed {
                return Some(meta);
            }
            // The block was freed and reused under us; chase the new meta.
            packed = reread;
        }
    }

    // --------------------------------------------------------------------------------------------
    // Recovery
    // --------------------------------------------------------------------------------------------

    fn recover(&mut self) -> Result<()> {
        let shard_blocks = self.log.shard_blocks();

        for shard in 0..SHARDS {
            let base = self.log.shard_base(shard);
            let mut off: u32 = 0;

            while off < shard_blocks {
                let rec_off = log::block_bytes(base + off);
                let mut meta_bytes = [0u8; RECORD_META_SIZE];
                meta_bytes.copy_from_slice(self.region.slice(rec_off, RECORD_META_SIZE));

                let Some(meta) = RecordMeta::decode(&meta_bytes) else {
                    break; // end of this shard's log
                };

                let span = meta.block_span as u32;
                if span == 0 || span > MAX_BLOCK_SPAN as u32 || off + span > shard_blocks {
                    warn!(shard, off, span, "torn record with invalid span, truncating shard");
                    break;
                }
                if !meta.is_tombstone() && meta.value_size as usize > MAX_VALUE_SIZE {
                    debug!(shard, off, "record with oversized value skipped");
                    off += span;
                    continue;
                }

                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(self.region.slice(rec_off + RECORD_META_SIZE, KEY_SIZE));
                let key_hash = xxh64(&key, 0);

                let value = self
                    .region
                    .slice(rec_off + RECORD_META_SIZE + KEY_SIZE, meta.value_len());
                if log::value_checksum(value, key_hash) != meta.checksum {
                    debug!(shard, off, "checksum mismatch, torn record skipped");
                    off += span;
                    continue;
                }

                self.install_recovered(
                    &key,
                    key_hash,
                    shard,
                    HashMeta {
                        block_off: base + off,
                        value_size: meta.value_size,
                        block_span: meta.block_span,
                        version: meta.version,
                    },
                )?;
                off += span;
            }

            self.log.set_head(shard, off);
        }

        // Count the live records the rebuilt index ended up with.
        let mut live: u64 = 0;
        for bucket in 0..self.index.bucket_count() as u32 {
            for pos in 0..self.index.chain_len(bucket) {
                if let Some(entry) = self.index.entry_at(bucket, pos)
                    && let Some(meta) = HashMeta::decode(entry.load_meta())
                    && !meta.is_tombstone()
                {
                    live += 1;
                }
            }
        }
        self.live.store(live, Ordering::Relaxed);

        info!(live, "fmap recovery complete");
        Ok(())
    }

    fn install_recovered(
        &self,
        key: &[u8; KEY_SIZE],
        key_hash: u64,
        shard: usize,
        meta: HashMeta,
    ) -> Result<()> {
        let bucket = self.index.bucket_of(key_hash);
        let slot = self.index.slot_of(bucket);
        let _guard = self.index.lock_slot(slot);

        match self.index.search_for_write(bucket, key, shard)? {
            SlotSearch::Found { entry, .. } => {
                if let Some(existing) = HashMeta::decode(entry.load_meta())
                    && version_newer(meta.version, existing.version)
                {
                    entry.publish_meta(meta);
                }
            }
            SlotSearch::Vacant { entry, .. } => {
                self.index.publish_new_entry(bucket, entry, key, meta);
            }
        }
        Ok(())
    }
}

impl Engine for FmapEngine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn exists(&self, key: &[u8]) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;

        let bucket = self.index.bucket_of(xxh64(key, 0));
        let slot = self.index.slot_of(bucket);

        let entry = self
            .index
            .cache_lookup(slot, key)
            .or_else(|| self.index.find(bucket, key).map(|(entry, _)| entry));
        match entry.and_then(|e| HashMeta::decode(e.load_meta())) {
            Some(meta) if !meta.is_tombstone() => Ok(()),
            _ => Err(fail(Status::NotFound, "key not found")),
        }
    }

    fn get(&self, key: &[u8], sink: ValueSink<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;

        let bucket = self.index.bucket_of(xxh64(key, 0));
        let slot = self.index.slot_of(bucket);

        let entry = match self.index.cache_lookup(slot, key) {
            Some(entry) => Some(entry),
            None => self.index.find(bucket, key).map(|(entry, loc)| {
                self.index.cache_store(slot, loc);
                entry
            }),
        };
        let Some(entry) = entry else {
            return Err(fail(Status::NotFound, "key not found"));
        };

        let mut value = Vec::new();
        if self.read_entry_value(entry, &mut value).is_none() {
            return Err(fail(Status::NotFound, "key not found"));
        }
        sink(&value);
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(fail(
                Status::InvalidArgument,
                format!("fmap values cap at {MAX_VALUE_SIZE} bytes, got {}", value.len()),
            ));
        }

        let key_hash = xxh64(key, 0);
        let bucket = self.index.bucket_of(key_hash);
        let slot = self.index.slot_of(bucket);
        let shard = self.writer_shard();

        // Off-lock: guess the next version, allocate, write, persist.
        // The guess is re-checked under the slot lock; a stale guess
        // costs one 6-byte meta rewrite.
        let guessed_version = self
            .index
            .find(bucket, key)
            .and_then(|(entry, _)| HashMeta::decode(entry.load_meta()))
            .map(|meta| meta.version.wrapping_add(1))
            .unwrap_or(1);

        let (block_off, span) = self.log.alloc(shard, log::span_for_value(value.len()))?;
        let mut record = RecordMeta {
            value_size: value.len() as u16,
            block_span: span,
            version: guessed_version,
            checksum: log::value_checksum(value, key_hash),
        };
        log::write_record(&self.region, block_off, &record, key, value)?;

        let _guard = self.index.lock_slot(slot);
        match self.index.search_for_write(bucket, key, shard)? {
            SlotSearch::Found { entry, loc } => {
                let Some(old) = HashMeta::decode(entry.load_meta()) else {
                    return Err(fail(Status::UnknownError, "published entry lost its meta"));
                };
                let version = old.version.wrapping_add(1);
                if version != record.version {
                    record.version = version;
                    log::rewrite_record_meta(&self.region, block_off, &record)?;
                }
                entry.publish_meta(HashMeta {
                    block_off,
                    value_size: record.value_size,
                    block_span: span,
                    version,
                });
                self.index.cache_store(slot, loc);
                if old.is_tombstone() {
                    self.live.fetch_add(1, Ordering::Relaxed);
                }
                self.log.push_free(shard, old.block_off, old.block_span);
            }
            SlotSearch::Vacant { entry, loc } => {
                if record.version != 1 {
                    record.version = 1;
                    log::rewrite_record_meta(&self.region, block_off, &record)?;
                }
                self.index.publish_new_entry(
                    bucket,
                    entry,
                    key,
                    HashMeta {
                        block_off,
                        value_size: record.value_size,
                        block_span: span,
                        version: 1,
                    },
                );
                self.index.cache_store(slot, loc);
                self.live.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;

        let key_hash = xxh64(key, 0);
        let bucket = self.index.bucket_of(key_hash);
        let slot = self.index.slot_of(bucket);

        // Cheap pre-check so absent keys do not burn log blocks.
        let current = self
            .index
            .find(bucket, key)
            .and_then(|(entry, _)| HashMeta::decode(entry.load_meta()));
        let Some(current) = current else {
            return Err(fail(Status::NotFound, "key not found"));
        };
        if current.is_tombstone() {
            return Err(fail(Status::NotFound, "key not found"));
        }

        let shard = self.writer_shard();
        let (block_off, span) = self.log.alloc(shard, 1)?;
        let mut record = RecordMeta {
            value_size: TOMBSTONE_VALUE_SIZE,
            block_span: span,
            version: current.version.wrapping_add(1),
            checksum: log::value_checksum(&[], key_hash),
        };
        log::write_record(&self.region, block_off, &record, key, &[])?;

        let _guard = self.index.lock_slot(slot);
        match self.index.search_for_write(bucket, key, shard)? {
            SlotSearch::Found { entry, loc } => {
                let Some(old) = HashMeta::decode(entry.load_meta()) else {
                    return Err(fail(Status::UnknownError, "published entry lost its meta"));
                };
                if old.is_tombstone() {
                    // Lost a race with another remover.
                    self.log.push_free(shard, block_off, span);
                    return Err(fail(Status::NotFound, "key not found"));
                }
                let version = old.version.wrapping_add(1);
                if version != record.version {
                    record.version = version;
                    log::rewrite_record_meta(&self.region, block_off, &record)?;
                }
                entry.publish_meta(HashMeta {
                    block_off,
                    value_size: TOMBSTONE_VALUE_SIZE,
                    block_span: span,
                    version,
                });
                self.index.cache_store(slot, loc);
                self.log.push_free(shard, old.block_off, old.block_span);
                self.live.fetch_sub(1, Ordering::Relaxed);
                Ok(())
            }
            SlotSearch::Vacant { .. } => {
                self.log.push_free(shard, block_off, span);
                Err(fail(Status::NotFound, "key not found"))
            }
        }
    }

    fn count_all(&self) -> Result<usize> {
        txscope::check()?;
        Ok(self.live.load(Ordering::Relaxed) as usize)
    }

    fn get_all(&self, visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;

        let mut value = Vec::new();
        for bucket in 0..self.index.bucket_count() as u32 {
            for pos in 0..self.index.chain_len(bucket) {
                let Some(entry) = self.index.entry_at(bucket, pos) else {
                    break;
                };
                if self.read_entry_value(entry, &mut value).is_none() {
                    continue;
                }
                let key = *entry.key();
                if visitor(&key, &value).is_break() {
                    return Err(fail(
                        Status::StoppedByCallback,
                        "enumeration stopped by callback",
                    ));
                }
            }
        }
        Ok(())
    }

    fn tx_begin(&self) -> Result<Box<dyn Transaction + '_>> {
        txscope::check()?;
        Ok(Box::new(FmapTransaction {
            engine: self,
            ops: Vec::new(),
            done: false,
        }))
    }

    fn read_iter(&self) -> Result<Box<dyn ReadIterator + '_>> {
        txscope::check()?;
        Ok(Box::new(FmapIter {
            engine: self,
            pos: None,
            key: [0u8; KEY_SIZE],
            value: Vec::new(),
        }))
    }
}

// ------------------------------------------------------------------------------------------------
// Transaction
// ------------------------------------------------------------------------------------------------

enum TxOp {
    Put(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// Staged batch of mutations, applied through the ordinary put/remove
/// publish paths on commit. Recovery after a crash mid-commit keeps
/// the already-published prefix.
struct FmapTransaction<'a> {
    engine: &'a FmapEngine,
    ops: Vec<TxOp>,
    done: bool,
}

impl FmapTransaction<'_> {
    fn check_open(&self) -> Result<()> {
        if self.done {
            return Err(fail(
                Status::InvalidArgument,
                "transaction handle already committed or ended",
            ));
        }
        Ok(())
    }
}

impl Transaction for FmapTransaction<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        FmapEngine::check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(fail(
                Status::InvalidArgument,
                format!("fmap values cap at {MAX_VALUE_SIZE} bytes, got {}", value.len()),
            ));
        }
        self.ops.push(TxOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        FmapEngine::check_key(key)?;
        self.ops.push(TxOp::Remove(key.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        txscope::check()?;
        self.done = true;
        for op in self.ops.drain(..) {
            match op {
                TxOp::Put(key, value) => self.engine.put(&key, &value)?,
                TxOp::Remove(key) => match self.engine.remove(&key) {
                    Ok(()) | Err(Status::NotFound) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    fn end(&mut self) {
        self.done = true;
        self.ops.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// Read iterator
// ------------------------------------------------------------------------------------------------

/// Unidirectional read cursor in hash-table order.
struct FmapIter<'a> {
    engine: &'a FmapEngine,
    /// `(bucket, chain position)` of the current element.
    pos: Option<(u32, u32)>,
    key: [u8; KEY_SIZE],
    value: Vec<u8>,
}

impl FmapIter<'_> {
    /// Finds the first live entry at or after `(bucket, pos)`.
    fn scan_from(&self, mut bucket: u32, mut pos: u32) -> Option<(u32, u32)> {
        let index = &self.engine.index;
        while (bucket as usize) < index.bucket_count() {
            let count = index.chain_len(bucket);
            while pos < count {
                if let Some(entry) = index.entry_at(bucket, pos)
                    && let Some(meta) = HashMeta::decode(entry.load_meta())
                    && !meta.is_tombstone()
                {
                    return Some((bucket, pos));
                }
                pos += 1;
            }
            bucket += 1;
            pos = 0;
        }
        None
    }

    /// Loads key and value at `(bucket, pos)`; false if it went stale.
    fn load(&mut self, bucket: u32, pos: u32) -> bool {
        let Some(entry) = self.engine.index.entry_at(bucket, pos) else {
            return false;
        };
        if self.engine.read_entry_value(entry, &mut self.value).is_none() {
            return false;
        }
        self.key = *entry.key();
        self.pos = Some((bucket, pos));
        true
    }

    fn require_position(&self) -> Result<(u32, u32)> {
        self.pos.ok_or_else(|| {
            fail(
                Status::InvalidArgument,
                "iterator is not positioned on an element",
            )
        })
    }
}

impl ReadIterator for FmapIter<'_> {
    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.pos = None;
        FmapEngine::check_key(key)?;

        let index = &self.engine.index;
        let bucket = index.bucket_of(xxh64(key, 0));
        for pos in 0..index.chain_len(bucket) {
            let Some(entry) = index.entry_at(bucket, pos) else {
                break;
            };
            if entry.key() as &[u8] == key {
                if self.engine.read_entry_value(entry, &mut self.value).is_none() {
                    break; // tombstone
                }
                self.key = *entry.key();
                self.pos = Some((bucket, pos));
                return Ok(());
            }
        }
        Err(fail(Status::NotFound, "key not found"))
    }

    fn next(&mut self) -> Result<()> {
        let (bucket, pos) = self.require_position()?;
        let mut from = (bucket, pos + 1);
        loop {
            match self.scan_from(from.0, from.1) {
                Some((b, p)) => {
                    if self.load(b, p) {
                        return Ok(());
                    }
                    // Entry got tombstoned between scan and load.
                    from = (b, p + 1);
                }
                None => {
                    self.pos = None;
                    return Err(fail(Status::NotFound, "no further element"));
                }
            }
        }
    }

    fn is_next(&self) -> bool {
        match self.pos {
            Some((bucket, pos)) => self.scan_from(bucket, pos + 1).is_some(),
            None => false,
        }
    }

    fn key(&self) -> Result<&[u8]> {
        self.require_position()?;
        Ok(&self.key)
    }

    fn read_range(&self, pos: usize, n: usize) -> Result<&[u8]> {
        self.require_position()?;
        let start = pos.min(self.value.len());
        let end = pos.saturating_add(n).min(self.value.len());
        Ok(&self.value[start..end])
    }
}
