//! Volatile hash index over the value log.
//!
//! The index is DRAM-only and rebuilt from the log on every open. It
//! is an open-chaining table of 128-byte buckets, five 24-byte entries
//! per bucket (`key(16) | meta(8)`), with the chain link drawn from a
//! spare bucket arena. Entries are never removed or moved once
//! published, which is what makes the lock-free read path and the
//! per-slot hot-entry cache sound.
//!
//! # Concurrency
//!
//! - Mutations take a **slot spin lock** (one lock per
//!   [`SLOT_GRAIN`] buckets, test-and-set with a pause hint).
//! - The 8-byte entry meta is an `AtomicU64`; its release store is the
//!   publish point of every insert, overwrite, and tombstone.
//! - A new entry's key bytes are written under the slot lock *before*
//!   the head bucket's entry count is bumped with a release store, so
//!   lock-free readers (which walk `0..count` with an acquire load)
//!   never observe a half-written key.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use super::log::{KEY_SIZE, SHARDS};
use crate::status::{Result, Status, fail};

/// Entries per 128-byte bucket (5 × 24 bytes + count + chain link).
pub const BUCKET_ENTRIES: usize = 5;

/// Buckets guarded by one slot lock.
pub const SLOT_GRAIN: usize = 8;

// ------------------------------------------------------------------------------------------------
// Hash-entry meta
// ------------------------------------------------------------------------------------------------

/// Decoded 8-byte hash-entry meta, packed high to low as
/// `{block_off:32 | value_size:16 | block_span:8 | version:8}`.
///
/// A packed value of zero means "no entry"; real entries always carry
/// `version >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashMeta {
    /// Absolute block offset of the record in the value log.
    pub block_off: u32,
    /// Stored value length, or the tombstone sentinel.
    pub value_size: u16,
    /// Blocks occupied by the record.
    pub block_span: u8,
    /// Per-key version; wraps at 255.
    pub version: u8,
}

impl HashMeta {
    /// Packs into the atomic 8-byte representation.
    pub fn encode(&self) -> u64 {
        ((self.block_off as u64) << 32)
            | ((self.value_size as u64) << 16)
            | ((self.block_span as u64) << 8)
            | self.version as u64
    }

    /// Unpacks; `None` for the empty-entry value.
    pub fn decode(packed: u64) -> Option<Self> {
        if packed == 0 {
            return None;
        }
        Some(Self {
            version: (packed & 0xFF) as u8,
            block_span: ((packed >> 8) & 0xFF) as u8,
            value_size: ((packed >> 16) & 0xFFFF) as u16,
            block_off: (packed >> 32) as u32,
        })
    }

    /// True for a tombstone entry.
    pub fn is_tombstone(&self) -> bool {
        self.value_size == super::log::TOMBSTONE_VALUE_SIZE
    }
}

/// Version comparison under u8 wraparound: `a` is newer than `b` when
/// it is ahead by less than half the version space.
pub fn version_newer(a: u8, b: u8) -> bool {
    a != b && a.wrapping_sub(b) < 128
}

// ------------------------------------------------------------------------------------------------
// Spin lock
// ------------------------------------------------------------------------------------------------

/// Test-and-set spin lock with a pause hint, one per slot.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Spins until the lock is acquired.
    pub fn lock(&self) -> SpinGuard<'_> {
        while self.locked.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
        SpinGuard { lock: self }
    }
}

/// RAII guard for a [`SpinLock`].
#[derive(Debug)]
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

// ------------------------------------------------------------------------------------------------
// Buckets and entries
// ------------------------------------------------------------------------------------------------

/// One `{key(16) | meta(8)}` index entry.
#[derive(Debug)]
pub struct HashEntry {
    key: UnsafeCell<[u8; KEY_SIZE]>,
    meta: AtomicU64,
}

// SAFETY: the key cell is written exactly once, under the slot lock,
// before the entry is published by the head bucket's count release
// store; afterwards it is read-only. The meta word is atomic.
unsafe impl Sync for HashEntry {}

impl HashEntry {
    fn new() -> Self {
        Self {
            key: UnsafeCell::new([0u8; KEY_SIZE]),
            meta: AtomicU64::new(0),
        }
    }

    /// The entry's key. Valid only for published entries.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        // SAFETY: see the `Sync` justification above.
        unsafe { &*self.key.get() }
    }

    /// Acquire-loads the packed meta word.
    pub fn load_meta(&self) -> u64 {
        self.meta.load(Ordering::Acquire)
    }

    /// Release-stores the packed meta word — the publish point.
    pub fn publish_meta(&self, meta: HashMeta) {
        self.meta.store(meta.encode(), Ordering::Release);
    }

    fn write_key(&self, key: &[u8]) {
        // SAFETY: called under the slot lock before publication.
        unsafe { (*self.key.get()).copy_from_slice(key) };
    }
}

/// A 128-byte-shaped bucket: five entries, the chain-entry count
/// (head bucket only), and the overflow link into the spare arena.
#[derive(Debug)]
pub struct Bucket {
    entries: [HashEntry; BUCKET_ENTRIES],
    /// Entries in the whole chain rooted at this bucket.
    count: AtomicU32,
    /// Spare-arena index + 1 of the overflow bucket; 0 = none.
    next: AtomicU32,
}

impl Bucket {
    fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| HashEntry::new()),
            count: AtomicU32::new(0),
            next: AtomicU32::new(0),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Index
// ------------------------------------------------------------------------------------------------

/// Result of a write-path chain walk.
pub enum SlotSearch<'a> {
    /// The key is present; `pos` is its chain position.
    Found {
        /// The matching entry.
        entry: &'a HashEntry,
        /// Chain position, for the hot-entry cache.
        loc: u64,
    },
    /// The key is absent; `entry` is the append slot.
    Vacant {
        /// The (still unpublished) append slot.
        entry: &'a HashEntry,
        /// Chain position the slot will occupy once published.
        loc: u64,
    },
}

/// The volatile hash table.
pub struct HashIndex {
    buckets: Box<[Bucket]>,
    spare: Box<[Bucket]>,
    locks: Box<[CachePadded<SpinLock>]>,
    /// Per-slot last-entry cache: a location code + 1, or 0.
    cache: Box<[CachePadded<AtomicU64>]>,
    /// Allocation cursors into each shard's spare slice.
    spare_heads: Vec<CachePadded<AtomicU32>>,
    spare_per_shard: u32,
    mask: u64,
}

impl HashIndex {
    /// Builds an index with `bucket_count` head buckets (a power of
    /// two) and a spare arena split evenly among the writer shards.
    pub fn new(bucket_count: usize, spare_per_shard: u32) -> Self {
        debug_assert!(bucket_count.is_power_of_two());
        let spare_count = spare_per_shard as usize * SHARDS;
        Self {
            buckets: (0..bucket_count).map(|_| Bucket::new()).collect(),
            spare: (0..spare_count).map(|_| Bucket::new()).collect(),
            locks: (0..bucket_count.div_ceil(SLOT_GRAIN))
                .map(|_| CachePadded::new(SpinLock::default()))
                .collect(),
            cache: (0..bucket_count.div_ceil(SLOT_GRAIN))
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
            spare_heads: (0..SHARDS)
                .map(|_| CachePadded::new(AtomicU32::new(0)))
                .collect(),
            spare_per_shard,
            mask: bucket_count as u64 - 1,
        }
    }

    /// Number of head buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Head bucket for a key hash.
    pub fn bucket_of(&self, key_hash: u64) -> u32 {
        (key_hash & self.mask) as u32
    }

    /// Slot (lock and cache index) of a head bucket.
    pub fn slot_of(&self, bucket: u32) -> u32 {
        bucket / SLOT_GRAIN as u32
    }

    /// Acquires the spin lock guarding `slot`.
    pub fn lock_slot(&self, slot: u32) -> SpinGuard<'_> {
        self.locks[slot as usize].lock()
    }

    /// Published entry count of a bucket chain.
    pub fn chain_len(&self, bucket: u32) -> u32 {
        self.buckets[bucket as usize].count.load(Ordering::Acquire)
    }

    fn chain_bucket(&self, loc_bucket: u32) -> &Bucket {
        let loc = loc_bucket as usize;
        if loc < self.buckets.len() {
            &self.buckets[loc]
        } else {
            &self.spare[loc - self.buckets.len()]
        }
    }

    fn loc_code(loc_bucket: u32, entry: usize) -> u64 {
        loc_bucket as u64 * BUCKET_ENTRIES as u64 + entry as u64
    }

    fn resolve_loc(&self, code: u64) -> &HashEntry {
        let loc_bucket = (code / BUCKET_ENTRIES as u64) as u32;
        let entry = (code % BUCKET_ENTRIES as u64) as usize;
        &self.chain_bucket(loc_bucket).entries[entry]
    }

    // --------------------------------------------------------------------------------------------
    // Lock-free read path
    // --------------------------------------------------------------------------------------------

    /// Consults the per-slot hot-entry cache.
    pub fn cache_lookup(&self, slot: u32, key: &[u8]) -> Option<&HashEntry> {
        let code = self.cache[slot as usize].load(Ordering::Acquire);
        if code == 0 {
            return None;
        }
        let entry = self.resolve_loc(code - 1);
        (entry.key() as &[u8] == key).then_some(entry)
    }

    /// Records the last entry touched under `slot`.
    pub fn cache_store(&self, slot: u32, loc: u64) {
        self.cache[slot as usize].store(loc + 1, Ordering::Release);
    }

    /// Walks the bucket chain for `key` without taking any lock.
    ///
    /// Returns the entry and its location code.
    pub fn find(&self, bucket: u32, key: &[u8]) -> Option<(&HashEntry, u64)> {
        let count = self.chain_len(bucket);
        let mut chain = &self.buckets[bucket as usize];
        let mut loc_bucket = bucket;

        for i in 0..count {
            let entry_idx = (i as usize) % BUCKET_ENTRIES;
            let entry = &chain.entries[entry_idx];
            if entry.key() as &[u8] == key {
                return Some((entry, Self::loc_code(loc_bucket, entry_idx)));
            }
            if entry_idx + 1 == BUCKET_ENTRIES && i + 1 < count {
                let next = chain.next.load(Ordering::Acquire);
                if next == 0 {
                    // A racing insert published the count before the
                    // link became visible; treat as absent.
                    return None;
                }
                loc_bucket = self.buckets.len() as u32 + (next - 1);
                chain = &self.spare[(next - 1) as usize];
            }
        }
        None
    }

    /// Resolves the entry at chain position `pos` of `bucket`, if
    /// published. Used by enumeration.
    pub fn entry_at(&self, bucket: u32, pos: u32) -> Option<&HashEntry> {
        if pos >= self.chain_len(bucket) {
            return None;
        }
        let mut chain = &self.buckets[bucket as usize];
        for _ in 0..(pos as usize) / BUCKET_ENTRIES {
            let next = chain.next.load(Ordering::Acquire);
            if next == 0 {
                return None;
            }
            chain = &self.spare[(next - 1) as usize];
        }
        Some(&chain.entries[(pos as usize) % BUCKET_ENTRIES])
    }

    // --------------------------------------------------------------------------------------------
    // Write path (slot lock held)
    // --------------------------------------------------------------------------------------------

    /// Chain walk for the write path. Must run under the slot lock of
    /// `bucket`. Allocates an overflow bucket from `shard`'s spare
    /// slice when the append position crosses into a fresh bucket.
    pub fn search_for_write(&self, bucket: u32, key: &[u8], shard: usize) -> Result<SlotSearch<'_>> {
        let count = self.chain_len(bucket);
        let mut chain = &self.buckets[bucket as usize];
        let mut loc_bucket = bucket;

        for i in 0..count {
            let entry_idx = (i as usize) % BUCKET_ENTRIES;
            let entry = &chain.entries[entry_idx];
            if entry.key() as &[u8] == key {
                return Ok(SlotSearch::Found {
                    entry,
                    loc: Self::loc_code(loc_bucket, entry_idx),
                });
            }
            if entry_idx + 1 == BUCKET_ENTRIES && i + 1 < count {
                let next = chain.next.load(Ordering::Acquire);
                debug_assert_ne!(next, 0, "chain link missing under slot lock");
                loc_bucket = self.buckets.len() as u32 + (next - 1);
                chain = &self.spare[(next - 1) as usize];
            }
        }

        // Append position: `count`. Cross into (and if needed allocate)
        // the overflow bucket when the current one is full.
        let entry_idx = (count as usize) % BUCKET_ENTRIES;
        if entry_idx == 0 && count > 0 {
            let next = chain.next.load(Ordering::Acquire);
            let spare_idx = if next == 0 {
                let idx = self.alloc_spare(shard)?;
                chain.next.store(idx + 1, Ordering::Release);
                idx
            } else {
                next - 1
            };
            loc_bucket = self.buckets.len() as u32 + spare_idx;
            chain = &self.spare[spare_idx as usize];
        }

        Ok(SlotSearch::Vacant {
            entry: &chain.entries[entry_idx],
            loc: Self::loc_code(loc_bucket, entry_idx),
        })
    }

    /// Publishes a brand-new entry: key bytes, meta, then the count
    /// bump that makes it visible. Must run under the slot lock.
    pub fn publish_new_entry(&self, bucket: u32, entry: &HashEntry, key: &[u8], meta: HashMeta) {
        entry.write_key(key);
        entry.publish_meta(meta);
        self.buckets[bucket as usize]
            .count
            .fetch_add(1, Ordering::Release);
    }

    fn alloc_spare(&self, shard: usize) -> Result<u32> {
        let relative = self.spare_heads[shard].fetch_add(1, Ordering::Relaxed);
        if relative >= self.spare_per_shard {
            return Err(fail(
                Status::OutOfMemory,
                format!("spare bucket arena exhausted for shard {shard}"),
            ));
        }
        Ok(shard as u32 * self.spare_per_shard + relative)
    }
}
