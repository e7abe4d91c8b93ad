//! Sharded persistent value log and block allocator.
//!
//! The region payload is partitioned into [`SHARDS`] equal slices, one
//! per writer class. Each shard's slice is an append-only log of
//! records, bump-allocated from a per-shard head; blocks freed by
//! overwrites go to per-shard free lists indexed by block span and are
//! preferred over fresh log space.
//!
//! # Record layout
//!
//! ```text
//! [meta(6) | key(16) | value(value_size) | zero pad to span*32]
//! ```
//!
//! The 6-byte record meta packs 48 bits, high to low:
//! `{checksum:16 | value_size:16 | block_span:8 | version:8}`.
//! An all-zero meta marks the end of a shard's log.

use std::sync::Mutex;

use crossbeam::utils::CachePadded;
use xxhash_rust::xxh64::xxh64;

use crate::region::Region;
use crate::status::{Result, Status, fail};

/// Fixed key width of the engine.
pub const KEY_SIZE: usize = 16;

/// Allocation granule of the value log.
pub const BLOCK_SIZE: usize = 32;

/// Largest accepted value.
pub const MAX_VALUE_SIZE: usize = 1024;

/// Number of writer classes (log shards).
pub const SHARDS: usize = 16;

/// On-media record meta width.
pub const RECORD_META_SIZE: usize = 6;

/// Largest record span in blocks: `ceil((6 + 16 + 1024) / 32)`.
pub const MAX_BLOCK_SPAN: usize = (RECORD_META_SIZE + KEY_SIZE + MAX_VALUE_SIZE).div_ceil(BLOCK_SIZE);

/// `value_size` sentinel marking a tombstone record (real values cap
/// at [`MAX_VALUE_SIZE`], so the sentinel can never collide).
pub const TOMBSTONE_VALUE_SIZE: u16 = 0xFFFF;

/// Free-list classes, indexed directly by block span (class 0 unused).
const FREE_CLASSES: usize = MAX_BLOCK_SPAN + 1;

/// Block span needed for a record carrying `value_len` value bytes.
pub fn span_for_value(value_len: usize) -> u8 {
    (RECORD_META_SIZE + KEY_SIZE + value_len).div_ceil(BLOCK_SIZE) as u8
}

/// 16-bit value checksum, derived from xxhash64 seeded by the key's
/// own 64-bit hash.
pub fn value_checksum(value: &[u8], key_hash: u64) -> u16 {
    (xxh64(value, key_hash) & 0xFFFF) as u16
}

// ------------------------------------------------------------------------------------------------
// Record meta
// ------------------------------------------------------------------------------------------------

/// Decoded 6-byte on-media record meta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    /// Stored value length, or [`TOMBSTONE_VALUE_SIZE`].
    pub value_size: u16,
    /// Blocks occupied by the record.
    pub block_span: u8,
    /// Per-key version; wraps at 255.
    pub version: u8,
    /// 16-bit value checksum.
    pub checksum: u16,
}

impl RecordMeta {
    /// Packs the meta into its 6 little-endian on-media bytes.
    pub fn encode(&self) -> [u8; RECORD_META_SIZE] {
        let packed: u64 = ((self.checksum as u64) << 32)
            | ((self.value_size as u64) << 16)
            | ((self.block_span as u64) << 8)
            | self.version as u64;
        let bytes = packed.to_le_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]]
    }

    /// Unpacks a 6-byte on-media meta; `None` for the all-zero
    /// end-of-log marker.
    pub fn decode(bytes: &[u8; RECORD_META_SIZE]) -> Option<Self> {
        let mut wide = [0u8; 8];
        wide[..RECORD_META_SIZE].copy_from_slice(bytes);
        let packed = u64::from_le_bytes(wide);
        if packed == 0 {
            return None;
        }
        Some(Self {
            version: (packed & 0xFF) as u8,
            block_span: ((packed >> 8) & 0xFF) as u8,
            value_size: ((packed >> 16) & 0xFFFF) as u16,
            checksum: ((packed >> 32) & 0xFFFF) as u16,
        })
    }

    /// True for a tombstone record.
    pub fn is_tombstone(&self) -> bool {
        self.value_size == TOMBSTONE_VALUE_SIZE
    }

    /// Value bytes carried by the record (zero for tombstones).
    pub fn value_len(&self) -> usize {
        if self.is_tombstone() { 0 } else { self.value_size as usize }
    }
}

// ------------------------------------------------------------------------------------------------
// Shard allocator
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct ShardAlloc {
    /// Next unallocated block, relative to the shard base.
    head: u32,
    /// Freed blocks by span class; absolute block offsets.
    free: Vec<Vec<u32>>,
}

/// The sharded block allocator over the region payload.
#[derive(Debug)]
pub struct ValueLog {
    /// Blocks owned by each shard.
    shard_blocks: u32,
    shards: Vec<CachePadded<Mutex<ShardAlloc>>>,
}

impl ValueLog {
    /// Carves the payload into [`SHARDS`] equal block slices.
    pub fn new(payload_len: usize) -> Self {
        let shard_blocks = ((payload_len / BLOCK_SIZE) / SHARDS) as u32;
        let shards = (0..SHARDS)
            .map(|_| {
                CachePadded::new(Mutex::new(ShardAlloc {
                    head: 0,
                    free: vec![Vec::new(); FREE_CLASSES],
                }))
            })
            .collect();
        Self {
            shard_blocks,
            shards,
        }
    }

    /// Blocks owned by one shard.
    pub fn shard_blocks(&self) -> u32 {
        self.shard_blocks
    }

    /// First absolute block of `shard`.
    pub fn shard_base(&self, shard: usize) -> u32 {
        shard as u32 * self.shard_blocks
    }

    /// Allocates `span` blocks on behalf of `shard`.
    ///
    /// Policy: a same-span free block first, then bump allocation off
    /// the shard's log head, then the smallest larger free block, and
    /// finally `OutOfMemory`. Returns the absolute block offset and
    /// the span class actually taken.
    pub fn alloc(&self, shard: usize, span: u8) -> Result<(u32, u8)> {
        let mut state = self.shards[shard]
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if let Some(off) = state.free[span as usize].pop() {
            return Ok((off, span));
        }

        if state.head + span as u32 <= self.shard_blocks {
            let off = self.shard_base(shard) + state.head;
            state.head += span as u32;
            return Ok((off, span));
        }

        for class in span as usize + 1..FREE_CLASSES {
            if let Some(off) = state.free[class].pop() {
                return Ok((off, class as u8));
            }
        }

        Err(fail(
            Status::OutOfMemory,
            format!("value log shard {shard} exhausted"),
        ))
    }

    /// Returns a freed block to `shard`'s free list.
    pub fn push_free(&self, shard: usize, block_off: u32, span: u8) {
        let mut state = self.shards[shard]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        state.free[span as usize].push(block_off);
    }

    /// Resets a shard's log head after recovery.
    pub fn set_head(&self, shard: usize, head: u32) {
        let mut state = self.shards[shard]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        state.head = head;
    }
}

// ------------------------------------------------------------------------------------------------
// Record I/O
// ------------------------------------------------------------------------------------------------

/// Byte offset of an absolute block.
pub fn block_bytes(block_off: u32) -> usize {
    block_off as usize * BLOCK_SIZE
}

/// Writes and persists a full record (zero-padded to its span).
pub fn write_record(
    region: &Region,
    block_off: u32,
    meta: &RecordMeta,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    let span_bytes = meta.block_span as usize * BLOCK_SIZE;
    let mut record = vec![0u8; span_bytes];
    record[..RECORD_META_SIZE].copy_from_slice(&meta.encode());
    record[RECORD_META_SIZE..RECORD_META_SIZE + KEY_SIZE].copy_from_slice(key);
    record[RECORD_META_SIZE + KEY_SIZE..RECORD_META_SIZE + KEY_SIZE + value.len()]
        .copy_from_slice(value);

    let off = block_bytes(block_off);
    region.write(off, &record);
    region.persist(off, span_bytes)?;
    Ok(())
}

/// Rewrites and persists just the 6-byte meta of a record already in
/// the log (used when the version guessed off-lock turns out stale).
pub fn rewrite_record_meta(region: &Region, block_off: u32, meta: &RecordMeta) -> Result<()> {
    let off = block_bytes(block_off);
    region.write(off, &meta.encode());
    region.persist(off, RECORD_META_SIZE)?;
    Ok(())
}

/// Copies a record's value bytes out of the log.
///
/// The copy may race an overwrite of a reused block; callers detect
/// that with the published-meta re-read guard.
pub fn read_value(region: &Region, block_off: u32, value_len: usize, buf: &mut Vec<u8>) {
    buf.resize(value_len, 0);
    region.read_into(block_bytes(block_off) + RECORD_META_SIZE + KEY_SIZE, buf);
}
