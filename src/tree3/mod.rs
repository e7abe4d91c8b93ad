//! `tree3` — the hybrid B+-tree.
//!
//! An **ordered**, crash-consistent engine over byte-string keys (up
//! to 20 bytes) and values (up to 200 bytes), with range queries and
//! bidirectional cursors.
//!
//! ## Hybrid layout
//!
//! Only leaves are persistent ([`leaf`]): a fixed arena of 48-slot
//! leaves, each carrying two sorted index arrays and a one-byte
//! `consistent_id` naming the authoritative one. Inserts and deletes
//! prepare the *working* array and publish with a single persisted
//! byte flip; in-place value updates stage the old bytes in a root
//! undo record first, so reopen always lands on the old or the new
//! value, never a torn one.
//!
//! The routing hierarchy ([`node`]) is volatile: inner nodes hold at
//! most 4 separator keys and are rebuilt bottom-up from the leaves on
//! every open, together with key-ordered neighbor links used by range
//! streaming.
//!
//! ## Split protocol
//!
//! A full leaf splits into **two fresh leaves**; the original is
//! emptied afterwards and recycled. The sequence is crash-repairable
//! from a persistent in-progress slot:
//!
//! 1. record `{orig, left, right, epoch}` in the root split slot,
//! 2. fill both children, publishing each with a final count store,
//! 3. empty the original and clear the slot.
//!
//! Reopen inspects the slot: with both children complete and
//! partitioning the original's entries, the split is finalized;
//! otherwise the children are wiped and the original stands. Either
//! way the tree reflects exactly one side of the split.
//!
//! ## Concurrency
//!
//! One engine-wide `RwLock`: writers (put, remove, split, commits)
//! serialize on the write side; readers share the read side and see
//! only published state.

pub mod leaf;
pub mod node;

#[cfg(test)]
mod tests;

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::comparator::{Comparator, default_comparator};
use crate::config::Config;
use crate::engine::{Engine, Transaction, ValueSink, Visitor};
use crate::iter::{ReadIterator, WriteIterator};
use crate::region::{self, Region, txscope};
use crate::status::{Result, Status, fail};

use leaf::{
    LEAF_KEYS, LEAF_SIZE, LeafRef, MAX_KEY_SIZE, MAX_VALUE_SIZE, ROOT_SIZE, RootRef, SplitSlot,
    pearson_hash,
};
use node::{Tree, VLeaf, VNode};

/// Registry name of this engine.
pub const ENGINE_NAME: &str = "tree3";

/// Smallest accepted pool (root block plus a usable handful of leaves).
const MIN_POOL_SIZE: u64 = 128 * 1024;

/// Registry factory.
pub(crate) fn factory(cfg: Config) -> Result<Box<dyn Engine>> {
    Ok(Box::new(Tree3Engine::open(cfg)?))
}

/// Cursor position inside the volatile tree: a leaf and an index into
/// its sorted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pos {
    leaf: u32,
    idx: usize,
}

/// Seek flavors shared by both cursors.
#[derive(Debug, Clone, Copy)]
enum Seek {
    Exact,
    Lower,
    LowerEq,
    Higher,
    HigherEq,
    First,
    Last,
}

/// The hybrid B+-tree engine.
pub struct Tree3Engine {
    region: Region,
    comparator: Arc<dyn Comparator>,
    tree: RwLock<Tree>,
}

impl std::fmt::Debug for Tree3Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree3Engine")
            .field("comparator", &self.comparator.name())
            .finish_non_exhaustive()
    }
}

impl Tree3Engine {
    /// Opens (or creates) a `tree3` pool from the configuration.
    pub fn open(mut cfg: Config) -> Result<Self> {
        txscope::check()?;

        let comparator = cfg.comparator().unwrap_or_else(default_comparator);
        let region =
            region::open_from_config(&mut cfg, ENGINE_NAME, comparator.name(), MIN_POOL_SIZE)?;

        if !region.is_new() && region.header().comparator_name() != comparator.name() {
            return Err(fail(
                Status::ComparatorMismatch,
                format!(
                    "pool was created with comparator \"{}\", reopened with \"{}\"",
                    region.header().comparator_name(),
                    comparator.name()
                ),
            ));
        }

        let capacity = (region.payload_len().saturating_sub(ROOT_SIZE) / LEAF_SIZE) as u32;
        if capacity < 4 {
            return Err(fail(
                Status::InvalidArgument,
                format!("pool too small: holds only {capacity} leaves"),
            ));
        }

        let tree = if region.is_new() {
            let epoch = RootRef::new(&region).bump_epoch()?;
            Tree::new(capacity, epoch)
        } else {
            recover(&region, comparator.as_ref(), capacity)?
        };

        debug!(capacity, records = tree.count, "tree3 engine ready");
        Ok(Self {
            region,
            comparator,
            tree: RwLock::new(tree),
        })
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(fail(
                Status::InvalidArgument,
                format!(
                    "tree3 keys must be 1..={MAX_KEY_SIZE} bytes, got {}",
                    key.len()
                ),
            ));
        }
        Ok(())
    }

    fn check_value(value: &[u8]) -> Result<()> {
        if value.len() > MAX_VALUE_SIZE {
            return Err(fail(
                Status::InvalidArgument,
                format!("tree3 values cap at {MAX_VALUE_SIZE} bytes, got {}", value.len()),
            ));
        }
        Ok(())
    }

    fn read_tree(&self) -> std::sync::RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_tree(&self) -> std::sync::RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    // --------------------------------------------------------------------------------------------
    // Lookup and position helpers (any lock held)
    // --------------------------------------------------------------------------------------------

    /// Exact lookup: `(leaf, slot)` of `key`.
    fn lookup(&self, tree: &Tree, key: &[u8]) -> Option<(u32, usize)> {
        let leaf_id = tree.descend(self.comparator.as_ref(), key)?;
        let vleaf = tree.leaves.get(&leaf_id)?;
        vleaf
            .find_slot(pearson_hash(key), key)
            .map(|slot| (leaf_id, slot))
    }

    fn first_pos(&self, tree: &Tree) -> Option<Pos> {
        let mut cursor = tree.first;
        while let Some(id) = cursor {
            let vleaf = tree.leaves.get(&id)?;
            if !vleaf.sorted.is_empty() {
                return Some(Pos { leaf: id, idx: 0 });
            }
            cursor = vleaf.next;
        }
        None
    }

    fn last_pos(&self, tree: &Tree) -> Option<Pos> {
        let mut cursor = tree.first;
        let mut last = None;
        while let Some(id) = cursor {
            let vleaf = tree.leaves.get(&id)?;
            if !vleaf.sorted.is_empty() {
                last = Some(Pos {
                    leaf: id,
                    idx: vleaf.sorted.len() - 1,
                });
            }
            cursor = vleaf.next;
        }
        last
    }

    fn next_pos(&self, tree: &Tree, pos: Pos) -> Option<Pos> {
        let vleaf = tree.leaves.get(&pos.leaf)?;
        if pos.idx + 1 < vleaf.sorted.len() {
            return Some(Pos {
                leaf: pos.leaf,
                idx: pos.idx + 1,
            });
        }
        let mut cursor = vleaf.next;
        while let Some(id) = cursor {
            let vleaf = tree.leaves.get(&id)?;
            if !vleaf.sorted.is_empty() {
                return Some(Pos { leaf: id, idx: 0 });
            }
            cursor = vleaf.next;
        }
        None
    }

    fn prev_pos(&self, tree: &Tree, pos: Pos) -> Option<Pos> {
        if pos.idx > 0 {
            return Some(Pos {
                leaf: pos.leaf,
                idx: pos.idx - 1,
            });
        }
        let mut cursor = tree.leaves.get(&pos.leaf)?.prev;
        while let Some(id) = cursor {
            let vleaf = tree.leaves.get(&id)?;
            if !vleaf.sorted.is_empty() {
                return Some(Pos {
                    leaf: id,
                    idx: vleaf.sorted.len() - 1,
                });
            }
            cursor = vleaf.prev;
        }
        None
    }

    /// First position with key `>= key`.
    fn seek_ge(&self, tree: &Tree, key: &[u8]) -> Option<Pos> {
        let leaf_id = tree.descend(self.comparator.as_ref(), key)?;
        let vleaf = tree.leaves.get(&leaf_id)?;
        let idx = vleaf.lower_bound(self.comparator.as_ref(), key);
        if idx < vleaf.sorted.len() {
            return Some(Pos { leaf: leaf_id, idx });
        }
        let mut cursor = vleaf.next;
        while let Some(id) = cursor {
            let vleaf = tree.leaves.get(&id)?;
            if !vleaf.sorted.is_empty() {
                return Some(Pos { leaf: id, idx: 0 });
            }
            cursor = vleaf.next;
        }
        None
    }

    /// First position with key `> key`.
    fn seek_gt(&self, tree: &Tree, key: &[u8]) -> Option<Pos> {
        let pos = self.seek_ge(tree, key)?;
        if self.comparator.compare(self.key_at(tree, pos)?, key) == CmpOrdering::Equal {
            self.next_pos(tree, pos)
        } else {
            Some(pos)
        }
    }

    /// Last position with key `< key`.
    fn seek_lt(&self, tree: &Tree, key: &[u8]) -> Option<Pos> {
        let leaf_id = tree.descend(self.comparator.as_ref(), key)?;
        let vleaf = tree.leaves.get(&leaf_id)?;
        let idx = vleaf.lower_bound(self.comparator.as_ref(), key);
        if idx > 0 {
            return Some(Pos {
                leaf: leaf_id,
                idx: idx - 1,
            });
        }
        let mut cursor = vleaf.prev;
        while let Some(id) = cursor {
            let vleaf = tree.leaves.get(&id)?;
            if !vleaf.sorted.is_empty() {
                return Some(Pos {
                    leaf: id,
                    idx: vleaf.sorted.len() - 1,
                });
            }
            cursor = vleaf.prev;
        }
        None
    }

    /// Last position with key `<= key`.
    fn seek_le(&self, tree: &Tree, key: &[u8]) -> Option<Pos> {
        if let Some(pos) = self.seek_ge(tree, key)
            && let Some(found) = self.key_at(tree, pos)
            && self.comparator.compare(found, key) == CmpOrdering::Equal
        {
            return Some(pos);
        }
        self.seek_lt(tree, key)
    }

    fn key_at<'t>(&self, tree: &'t Tree, pos: Pos) -> Option<&'t [u8]> {
        let vleaf = tree.leaves.get(&pos.leaf)?;
        let slot = *vleaf.sorted.get(pos.idx)? as usize;
        vleaf.keys[slot].as_deref()
    }

    /// Elements from `pos` (inclusive) to the end.
    fn remaining_from(&self, tree: &Tree, pos: Pos) -> usize {
        let Some(vleaf) = tree.leaves.get(&pos.leaf) else {
            return 0;
        };
        let mut total = vleaf.sorted.len() - pos.idx;
        let mut cursor = vleaf.next;
        while let Some(id) = cursor {
            let Some(vleaf) = tree.leaves.get(&id) else {
                break;
            };
            total += vleaf.sorted.len();
            cursor = vleaf.next;
        }
        total
    }

    /// Streams positions from `start`, stopping when `stop(key)` turns
    /// true or the visitor breaks.
    fn stream(
        &self,
        tree: &Tree,
        start: Option<Pos>,
        stop: impl Fn(&[u8]) -> bool,
        visitor: Visitor<'_>,
    ) -> Result<()> {
        let mut pos = start;
        while let Some(p) = pos {
            let Some(vleaf) = tree.leaves.get(&p.leaf) else {
                break;
            };
            let slot = vleaf.sorted[p.idx] as usize;
            let leaf = LeafRef::new(&self.region, p.leaf);
            let key = leaf.slot_key(slot);
            if stop(key) {
                return Ok(());
            }
            if visitor(key, leaf.slot_value(slot)).is_break() {
                return Err(fail(
                    Status::StoppedByCallback,
                    "enumeration stopped by callback",
                ));
            }
            pos = self.next_pos(tree, p);
        }
        Ok(())
    }

    /// Shared seek logic of both cursors: resolves the target and
    /// copies out its key and value.
    fn seek_snapshot(&self, kind: Seek, key: Option<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        let tree = self.read_tree();
        let pos = match (kind, key) {
            (Seek::Exact, Some(key)) => {
                let (leaf_id, slot) = self.lookup(&tree, key)?;
                let vleaf = tree.leaves.get(&leaf_id)?;
                let idx = vleaf.sorted.iter().position(|&s| s as usize == slot)?;
                Some(Pos { leaf: leaf_id, idx })
            }
            (Seek::Lower, Some(key)) => self.seek_lt(&tree, key),
            (Seek::LowerEq, Some(key)) => self.seek_le(&tree, key),
            (Seek::Higher, Some(key)) => self.seek_gt(&tree, key),
            (Seek::HigherEq, Some(key)) => self.seek_ge(&tree, key),
            (Seek::First, _) => self.first_pos(&tree),
            (Seek::Last, _) => self.last_pos(&tree),
            _ => None,
        }?;

        let vleaf = tree.leaves.get(&pos.leaf)?;
        let slot = *vleaf.sorted.get(pos.idx)? as usize;
        let leaf = LeafRef::new(&self.region, pos.leaf);
        Some((leaf.slot_key(slot).to_vec(), leaf.slot_value(slot).to_vec()))
    }

    // --------------------------------------------------------------------------------------------
    // Mutations (write lock held)
    // --------------------------------------------------------------------------------------------

    fn put_locked(&self, tree: &mut Tree, key: &[u8], value: &[u8]) -> Result<()> {
        let cmp = self.comparator.as_ref();
        let root = RootRef::new(&self.region);

        let Some(leaf_id) = tree.descend(cmp, key) else {
            return self.insert_first_leaf(tree, &root, key, value);
        };

        let leaf = LeafRef::new(&self.region, leaf_id);
        leaf.touch_epoch(tree.epoch)?;

        let hash = pearson_hash(key);
        let (found_slot, vacant_slot, insert_pos, occupancy) = {
            let Some(vleaf) = tree.leaves.get(&leaf_id) else {
                return Err(fail(Status::UnknownError, "volatile leaf missing"));
            };
            (
                vleaf.find_slot(hash, key),
                vleaf.vacant_slot(),
                vleaf.lower_bound(cmp, key),
                vleaf.sorted.len(),
            )
        };

        if let Some(slot) = found_slot {
            return self.update_value_locked(tree, leaf_id, slot, value);
        }

        if occupancy < LEAF_KEYS {
            let Some(slot) = vacant_slot else {
                return Err(fail(Status::UnknownError, "leaf occupancy out of sync"));
            };
            leaf.write_slot(slot, key, value)?;

            let which = leaf.consistent_id() & 1;
            let working = 1 - which;
            let mut sorted = match tree.leaves.get(&leaf_id) {
                Some(vleaf) => vleaf.sorted.clone(),
                None => return Err(fail(Status::UnknownError, "volatile leaf missing")),
            };
            sorted.insert(insert_pos, slot as u8);
            leaf.write_working(working, &sorted)?;
            leaf.flip_consistent(working)?;

            if let Some(vleaf) = tree.leaves.get_mut(&leaf_id) {
                vleaf.hashes[slot] = hash;
                vleaf.keys[slot] = Some(key.to_vec());
                vleaf.sorted = sorted;
            }
            tree.count += 1;
            return Ok(());
        }

        self.split_and_insert(tree, &root, leaf_id, key, value)
    }

    /// In-place value overwrite, staged through the root undo record
    /// so reopen sees the old bytes or the new ones.
    fn update_value_locked(
        &self,
        tree: &Tree,
        leaf_id: u32,
        slot: usize,
        value: &[u8],
    ) -> Result<()> {
        let _ = tree;
        let root = RootRef::new(&self.region);
        let leaf = LeafRef::new(&self.region, leaf_id);

        let old = leaf.slot_value(slot).to_vec();
        root.arm_undo(leaf_id, slot, &old)?;
        leaf.write_slot_value(slot, value)?;
        root.disarm_undo()?;
        Ok(())
    }

    fn insert_first_leaf(
        &self,
        tree: &mut Tree,
        root: &RootRef<'_>,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let id = self.alloc_leaf(tree, root)?;
        let leaf = LeafRef::new(&self.region, id);
        leaf.init_header(tree.epoch)?;
        leaf.write_slot(0, key, value)?;
        leaf.write_working(0, &[0])?;

        let mut vleaf = VLeaf::empty();
        vleaf.hashes[0] = pearson_hash(key);
        vleaf.keys[0] = Some(key.to_vec());
        vleaf.sorted = vec![0];
        tree.leaves.insert(id, vleaf);
        tree.first = Some(id);
        tree.root = Some(VNode::Leaf(id));
        tree.count += 1;
        Ok(())
    }

    fn alloc_leaf(&self, tree: &mut Tree, root: &RootRef<'_>) -> Result<u32> {
        if let Some(id) = tree.pool.pop() {
            return Ok(id);
        }
        if tree.fresh < tree.capacity {
            let id = tree.fresh;
            let leaf = LeafRef::new(&self.region, id);
            leaf.chain(root.head())?;
            root.set_head(id)?;
            tree.fresh += 1;
            return Ok(id);
        }
        Err(fail(Status::OutOfMemory, "leaf arena exhausted"))
    }

    /// Fills a split child and publishes it with the final count store.
    fn fill_leaf(&self, id: u32, entries: &[(Vec<u8>, Vec<u8>)], epoch: u32) -> Result<()> {
        let leaf = LeafRef::new(&self.region, id);
        leaf.init_header(epoch)?;
        for (slot, (key, value)) in entries.iter().enumerate() {
            leaf.write_slot(slot, key, value)?;
        }
        let sorted: Vec<u8> = (0..entries.len() as u8).collect();
        leaf.write_idxs(0, &sorted)?;
        leaf.publish_fill(entries.len())?;
        Ok(())
    }

    fn split_and_insert(
        &self,
        tree: &mut Tree,
        root: &RootRef<'_>,
        orig_id: u32,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let cmp = self.comparator.as_ref();

        // Owned copy of the original entries plus the newcomer.
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = {
            let Some(vleaf) = tree.leaves.get(&orig_id) else {
                return Err(fail(Status::UnknownError, "volatile leaf missing"));
            };
            let orig = LeafRef::new(&self.region, orig_id);
            vleaf
                .sorted
                .iter()
                .map(|&slot| {
                    let slot = slot as usize;
                    (orig.slot_key(slot).to_vec(), orig.slot_value(slot).to_vec())
                })
                .collect()
        };
        let pos = entries.partition_point(|(k, _)| cmp.compare(k, key) == CmpOrdering::Less);
        entries.insert(pos, (key.to_vec(), value.to_vec()));

        let left_id = self.alloc_leaf(tree, root)?;
        let right_id = match self.alloc_leaf(tree, root) {
            Ok(id) => id,
            Err(e) => {
                tree.pool.push(left_id);
                return Err(e);
            }
        };

        root.set_split_slot(SplitSlot {
            orig: orig_id,
            left: left_id,
            right: right_id,
            epoch: tree.epoch,
        })?;

        let mid = entries.len() / 2;
        self.fill_leaf(left_id, &entries[..mid], tree.epoch)?;
        self.fill_leaf(right_id, &entries[mid..], tree.epoch)?;

        // Retire the original and commit the split.
        let orig = LeafRef::new(&self.region, orig_id);
        let working = 1 - (orig.consistent_id() & 1);
        orig.write_working(working, &[])?;
        orig.flip_consistent(working)?;
        root.clear_split_slot()?;

        debug!(orig = orig_id, left = left_id, right = right_id, "leaf split");

        // Volatile rewire.
        let make_vleaf = |chunk: &[(Vec<u8>, Vec<u8>)]| {
            let mut vleaf = VLeaf::empty();
            for (slot, (k, _)) in chunk.iter().enumerate() {
                vleaf.hashes[slot] = pearson_hash(k);
                vleaf.keys[slot] = Some(k.clone());
                vleaf.sorted.push(slot as u8);
            }
            vleaf
        };
        let mut left_v = make_vleaf(&entries[..mid]);
        let mut right_v = make_vleaf(&entries[mid..]);

        let Some(old_v) = tree.leaves.remove(&orig_id) else {
            return Err(fail(Status::UnknownError, "volatile leaf missing"));
        };
        left_v.prev = old_v.prev;
        left_v.next = Some(right_id);
        right_v.prev = Some(left_id);
        right_v.next = old_v.next;
        if let Some(prev) = old_v.prev
            && let Some(vleaf) = tree.leaves.get_mut(&prev)
        {
            vleaf.next = Some(left_id);
        }
        if let Some(next) = old_v.next
            && let Some(vleaf) = tree.leaves.get_mut(&next)
        {
            vleaf.prev = Some(right_id);
        }
        if tree.first == Some(orig_id) {
            tree.first = Some(left_id);
        }
        tree.leaves.insert(left_id, left_v);
        tree.leaves.insert(right_id, right_v);
        tree.pool.push(orig_id);

        let sep = entries[mid].0.clone();
        let route_key = entries[0].0.clone();
        tree.replace_after_split(cmp, &route_key, orig_id, left_id, sep, right_id);
        tree.count += 1;
        Ok(())
    }

    fn remove_locked(&self, tree: &mut Tree, key: &[u8]) -> Result<()> {
        let cmp = self.comparator.as_ref();
        let Some(leaf_id) = tree.descend(cmp, key) else {
            return Err(fail(Status::NotFound, "key not found"));
        };

        let (slot, sorted) = {
            let Some(vleaf) = tree.leaves.get(&leaf_id) else {
                return Err(fail(Status::NotFound, "key not found"));
            };
            let Some(slot) = vleaf.find_slot(pearson_hash(key), key) else {
                return Err(fail(Status::NotFound, "key not found"));
            };
            let sorted: Vec<u8> = vleaf
                .sorted
                .iter()
                .copied()
                .filter(|&s| s as usize != slot)
                .collect();
            (slot, sorted)
        };

        let leaf = LeafRef::new(&self.region, leaf_id);
        leaf.touch_epoch(tree.epoch)?;
        let working = 1 - (leaf.consistent_id() & 1);
        leaf.write_working(working, &sorted)?;
        leaf.flip_consistent(working)?;

        if let Some(vleaf) = tree.leaves.get_mut(&leaf_id) {
            vleaf.keys[slot] = None;
            vleaf.sorted = sorted;
        }
        tree.count -= 1;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Recovery
// ------------------------------------------------------------------------------------------------

fn recover(region: &Region, cmp: &dyn Comparator, capacity: u32) -> Result<Tree> {
    let root = RootRef::new(region);

    // 1. Undo an interrupted in-place value overwrite.
    if let Some((leaf_id, slot, old)) = root.undo_slot() {
        if leaf_id < capacity && slot < LEAF_KEYS && old.len() <= MAX_VALUE_SIZE {
            LeafRef::new(region, leaf_id).write_slot_value(slot, &old)?;
            info!(leaf = leaf_id, slot, "in-place value overwrite rolled back");
        }
        root.disarm_undo()?;
    }

    // 2. Repair an interrupted split.
    if let Some(split) = root.split_slot() {
        repair_split(region, &root, split, capacity)?;
    }

    // 3. New epoch; leaves re-validate lazily on first touch.
    let epoch = root.bump_epoch()?;

    // 4. Chain walk: live leaves into the tree, empty ones to the pool.
    let mut tree = Tree::new(capacity, epoch);
    let mut ordered: Vec<(Vec<u8>, u32)> = Vec::new();
    let mut visited = HashSet::new();
    let mut max_id: Option<u32> = None;
    let mut cursor = root.head();

    while let Some(id) = cursor {
        if id >= capacity || !visited.insert(id) {
            warn!(leaf = id, "leaf chain corrupt, truncating walk");
            break;
        }
        max_id = Some(max_id.map_or(id, |m| m.max(id)));

        let leaf = LeafRef::new(region, id);
        let which = leaf.consistent_id() & 1;
        let idxs = leaf.idxs(which);
        if idxs.is_empty() {
            tree.pool.push(id);
        } else {
            let mut vleaf = VLeaf::empty();
            for &slot in idxs {
                let slot = slot as usize;
                if slot >= LEAF_KEYS || vleaf.keys[slot].is_some() {
                    warn!(leaf = id, slot, "corrupt index entry skipped");
                    continue;
                }
                vleaf.hashes[slot] = leaf.slot_hash(slot);
                vleaf.keys[slot] = Some(leaf.slot_key(slot).to_vec());
                vleaf.sorted.push(slot as u8);
            }
            tree.count += vleaf.sorted.len();
            if let Some(min) = vleaf.min_key() {
                ordered.push((min.to_vec(), id));
                tree.leaves.insert(id, vleaf);
            } else {
                tree.pool.push(id);
            }
        }
        cursor = leaf.next();
    }

    tree.fresh = max_id.map_or(0, |m| m + 1);
    ordered.sort_by(|a, b| cmp.compare(&a.0, &b.0));
    tree.rebuild(ordered);

    info!(
        leaves = tree.leaves.len(),
        records = tree.count,
        "tree3 recovery complete"
    );
    Ok(tree)
}

fn repair_split(
    region: &Region,
    root: &RootRef<'_>,
    split: SplitSlot,
    capacity: u32,
) -> Result<()> {
    let SplitSlot {
        orig, left, right, ..
    } = split;
    if orig >= capacity || left >= capacity || right >= capacity {
        warn!(orig, left, right, "split slot out of range, discarded");
        return root.clear_split_slot();
    }

    let orig_leaf = LeafRef::new(region, orig);
    let left_leaf = LeafRef::new(region, left);
    let right_leaf = LeafRef::new(region, right);

    let children_complete = left_leaf.live_count() > 0 && right_leaf.live_count() > 0;
    if children_complete
        && (orig_leaf.live_count() == 0 || partition_holds(&orig_leaf, &left_leaf, &right_leaf))
    {
        // Finalize: the children carry everything; retire the original.
        if orig_leaf.live_count() > 0 {
            let working = 1 - (orig_leaf.consistent_id() & 1);
            orig_leaf.write_working(working, &[])?;
            orig_leaf.flip_consistent(working)?;
        }
        root.clear_split_slot()?;
        info!(orig, left, right, "interrupted split finalized");
        return Ok(());
    }

    // Undo: wipe the children, the original stands untouched.
    left_leaf.clear_counts()?;
    right_leaf.clear_counts()?;
    root.clear_split_slot()?;
    info!(orig, left, right, "interrupted split rolled back");
    Ok(())
}

/// True when the children's keys are exactly the original's.
fn partition_holds(orig: &LeafRef<'_>, left: &LeafRef<'_>, right: &LeafRef<'_>) -> bool {
    let collect = |leaf: &LeafRef<'_>| -> Vec<Vec<u8>> {
        let which = leaf.consistent_id() & 1;
        leaf.idxs(which)
            .iter()
            .filter(|&&slot| (slot as usize) < LEAF_KEYS)
            .map(|&slot| leaf.slot_key(slot as usize).to_vec())
            .collect()
    };
    let mut orig_keys = collect(orig);
    let mut child_keys: Vec<Vec<u8>> = collect(left);
    child_keys.extend(collect(right));

    // The newcomer that triggered the split lives only in a child.
    if child_keys.len() != orig_keys.len() + 1 {
        return false;
    }
    orig_keys.sort_unstable();
    child_keys.sort_unstable();
    orig_keys.iter().all(|k| child_keys.binary_search(k).is_ok())
}

// ------------------------------------------------------------------------------------------------
// Engine implementation
// ------------------------------------------------------------------------------------------------

impl Engine for Tree3Engine {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn exists(&self, key: &[u8]) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        match self.lookup(&tree, key) {
            Some(_) => Ok(()),
            None => Err(fail(Status::NotFound, "key not found")),
        }
    }

    fn get(&self, key: &[u8], sink: ValueSink<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let Some((leaf_id, slot)) = self.lookup(&tree, key) else {
            return Err(fail(Status::NotFound, "key not found"));
        };
        let leaf = LeafRef::new(&self.region, leaf_id);
        sink(leaf.slot_value(slot));
        Ok(())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        Self::check_value(value)?;
        let mut tree = self.write_tree();
        self.put_locked(&mut tree, key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let mut tree = self.write_tree();
        self.remove_locked(&mut tree, key)
    }

    fn count_all(&self) -> Result<usize> {
        txscope::check()?;
        Ok(self.read_tree().count)
    }

    fn get_all(&self, visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;
        let tree = self.read_tree();
        let start = self.first_pos(&tree);
        self.stream(&tree, start, |_| false, visitor)
    }

    fn count_above(&self, key: &[u8]) -> Result<usize> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        Ok(self
            .seek_gt(&tree, key)
            .map_or(0, |pos| self.remaining_from(&tree, pos)))
    }

    fn count_equal_above(&self, key: &[u8]) -> Result<usize> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        Ok(self
            .seek_ge(&tree, key)
            .map_or(0, |pos| self.remaining_from(&tree, pos)))
    }

    fn count_below(&self, key: &[u8]) -> Result<usize> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let at_or_above = self
            .seek_ge(&tree, key)
            .map_or(0, |pos| self.remaining_from(&tree, pos));
        Ok(tree.count - at_or_above)
    }

    fn count_equal_below(&self, key: &[u8]) -> Result<usize> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let above = self
            .seek_gt(&tree, key)
            .map_or(0, |pos| self.remaining_from(&tree, pos));
        Ok(tree.count - above)
    }

    fn count_between(&self, a: &[u8], b: &[u8]) -> Result<usize> {
        txscope::check()?;
        Self::check_key(a)?;
        Self::check_key(b)?;
        let tree = self.read_tree();
        if self.comparator.compare(a, b) != CmpOrdering::Less {
            return Ok(0);
        }
        let from_a = self
            .seek_ge(&tree, a)
            .map_or(0, |pos| self.remaining_from(&tree, pos));
        let from_b = self
            .seek_ge(&tree, b)
            .map_or(0, |pos| self.remaining_from(&tree, pos));
        Ok(from_a - from_b)
    }

    fn get_above(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let start = self.seek_gt(&tree, key);
        self.stream(&tree, start, |_| false, visitor)
    }

    fn get_equal_above(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let start = self.seek_ge(&tree, key);
        self.stream(&tree, start, |_| false, visitor)
    }

    fn get_below(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let start = self.first_pos(&tree);
        let cmp = Arc::clone(&self.comparator);
        let bound = key.to_vec();
        self.stream(
            &tree,
            start,
            move |k| cmp.compare(k, &bound) != CmpOrdering::Less,
            visitor,
        )
    }

    fn get_equal_below(&self, key: &[u8], visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(key)?;
        let tree = self.read_tree();
        let start = self.first_pos(&tree);
        let cmp = Arc::clone(&self.comparator);
        let bound = key.to_vec();
        self.stream(
            &tree,
            start,
            move |k| cmp.compare(k, &bound) == CmpOrdering::Greater,
            visitor,
        )
    }

    fn get_between(&self, a: &[u8], b: &[u8], visitor: Visitor<'_>) -> Result<()> {
        txscope::check()?;
        Self::check_key(a)?;
        Self::check_key(b)?;
        let tree = self.read_tree();
        if self.comparator.compare(a, b) != CmpOrdering::Less {
            return Ok(());
        }
        let start = self.seek_ge(&tree, a);
        let cmp = Arc::clone(&self.comparator);
        let bound = b.to_vec();
        self.stream(
            &tree,
            start,
            move |k| cmp.compare(k, &bound) != CmpOrdering::Less,
            visitor,
        )
    }

    fn tx_begin(&self) -> Result<Box<dyn Transaction + '_>> {
        txscope::check()?;
        Ok(Box::new(Tree3Transaction {
            engine: self,
            ops: Vec::new(),
            done: false,
        }))
    }

    fn read_iter(&self) -> Result<Box<dyn ReadIterator + '_>> {
        txscope::check()?;
        Ok(Box::new(Tree3Iter {
            engine: self,
            key: None,
            value: Vec::new(),
        }))
    }

    fn write_iter(&mut self) -> Result<Box<dyn WriteIterator + '_>> {
        txscope::check()?;
        Ok(Box::new(Tree3WriteIter {
            engine: self,
            key: None,
            value: Vec::new(),
            log: Vec::new(),
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

/// Staged batch applied under one write-lock acquisition; each op
/// publishes through its ordinary crash-atomic path, so a crash mid-
/// commit durably keeps a prefix of the batch.
struct Tree3Transaction<'a> {
    engine: &'a Tree3Engine,
    ops: Vec<TxOp>,
    done: bool,
}

impl Tree3Transaction<'_> {
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

impl Transaction for Tree3Transaction<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        Tree3Engine::check_key(key)?;
        Tree3Engine::check_value(value)?;
        self.ops.push(TxOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.check_open()?;
        Tree3Engine::check_key(key)?;
        self.ops.push(TxOp::Remove(key.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        txscope::check()?;
        self.done = true;
        let mut tree = self.engine.write_tree();
        for op in self.ops.drain(..) {
            match op {
                TxOp::Put(key, value) => self.engine.put_locked(&mut tree, &key, &value)?,
                TxOp::Remove(key) => match self.engine.remove_locked(&mut tree, &key) {
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
// Cursors
// ------------------------------------------------------------------------------------------------

/// Bidirectional read cursor. Positions are tracked by owned key, so
/// the cursor stays valid across concurrent mutations.
struct Tree3Iter<'a> {
    engine: &'a Tree3Engine,
    key: Option<Vec<u8>>,
    value: Vec<u8>,
}

impl Tree3Iter<'_> {
    fn apply_seek(&mut self, kind: Seek, key: Option<&[u8]>) -> Result<()> {
        match self.engine.seek_snapshot(kind, key) {
            Some((key, value)) => {
                self.key = Some(key);
                self.value = value;
                Ok(())
            }
            None => {
                self.key = None;
                Err(fail(Status::NotFound, "no element at the seek target"))
            }
        }
    }

    fn current_key(&self) -> Result<&[u8]> {
        self.key.as_deref().ok_or_else(|| {
            fail(
                Status::InvalidArgument,
                "iterator is not positioned on an element",
            )
        })
    }
}

impl ReadIterator for Tree3Iter<'_> {
    fn seek(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::Exact, Some(key))
    }

    fn seek_lower(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::Lower, Some(key))
    }

    fn seek_lower_eq(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::LowerEq, Some(key))
    }

    fn seek_higher(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::Higher, Some(key))
    }

    fn seek_higher_eq(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::HigherEq, Some(key))
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.apply_seek(Seek::First, None)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.apply_seek(Seek::Last, None)
    }

    fn next(&mut self) -> Result<()> {
        let current = self.current_key()?.to_vec();
        self.apply_seek(Seek::Higher, Some(&current))
    }

    fn prev(&mut self) -> Result<()> {
        let current = self.current_key()?.to_vec();
        self.apply_seek(Seek::Lower, Some(&current))
    }

    fn is_next(&self) -> bool {
        match &self.key {
            Some(key) => self.engine.seek_snapshot(Seek::Higher, Some(key)).is_some(),
            None => false,
        }
    }

    fn key(&self) -> Result<&[u8]> {
        self.current_key()
    }

    fn read_range(&self, pos: usize, n: usize) -> Result<&[u8]> {
        self.current_key()?;
        let start = pos.min(self.value.len());
        let end = pos.saturating_add(n).min(self.value.len());
        Ok(&self.value[start..end])
    }
}

/// Write cursor: stages byte-range edits against the current value and
/// applies them atomically on commit through the engine's undo-guarded
/// in-place overwrite.
struct Tree3WriteIter<'a> {
    engine: &'a Tree3Engine,
    key: Option<Vec<u8>>,
    /// Pre-commit value snapshot; `read_range` answers from here even
    /// while edits are staged.
    value: Vec<u8>,
    /// Staged `(start, bytes)` edits, applied in order on commit.
    log: Vec<(usize, Vec<u8>)>,
}

impl Tree3WriteIter<'_> {
    fn apply_seek(&mut self, kind: Seek, key: Option<&[u8]>) -> Result<()> {
        // A reposition with staged edits silently aborts them.
        self.log.clear();
        match self.engine.seek_snapshot(kind, key) {
            Some((key, value)) => {
                self.key = Some(key);
                self.value = value;
                Ok(())
            }
            None => {
                self.key = None;
                Err(fail(Status::NotFound, "no element at the seek target"))
            }
        }
    }

    fn current_key(&self) -> Result<&[u8]> {
        self.key.as_deref().ok_or_else(|| {
            fail(
                Status::InvalidArgument,
                "iterator is not positioned on an element",
            )
        })
    }
}

impl ReadIterator for Tree3WriteIter<'_> {
    fn seek(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::Exact, Some(key))
    }

    fn seek_lower(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::Lower, Some(key))
    }

    fn seek_lower_eq(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::LowerEq, Some(key))
    }

    fn seek_higher(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::Higher, Some(key))
    }

    fn seek_higher_eq(&mut self, key: &[u8]) -> Result<()> {
        Tree3Engine::check_key(key)?;
        self.apply_seek(Seek::HigherEq, Some(key))
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.apply_seek(Seek::First, None)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.apply_seek(Seek::Last, None)
    }

    fn next(&mut self) -> Result<()> {
        let current = self.current_key()?.to_vec();
        self.apply_seek(Seek::Higher, Some(&current))
    }

    fn prev(&mut self) -> Result<()> {
        let current = self.current_key()?.to_vec();
        self.apply_seek(Seek::Lower, Some(&current))
    }

    fn is_next(&self) -> bool {
        match &self.key {
            Some(key) => self.engine.seek_snapshot(Seek::Higher, Some(key)).is_some(),
            None => false,
        }
    }

    fn key(&self) -> Result<&[u8]> {
        self.current_key()
    }

    fn read_range(&self, pos: usize, n: usize) -> Result<&[u8]> {
        self.current_key()?;
        let start = pos.min(self.value.len());
        let end = pos.saturating_add(n).min(self.value.len());
        Ok(&self.value[start..end])
    }
}

impl WriteIterator for Tree3WriteIter<'_> {
    fn write_range(&mut self, pos: usize, n: usize) -> Result<&mut [u8]> {
        self.current_key()?;
        let start = pos.min(self.value.len());
        let end = pos.saturating_add(n).min(self.value.len());
        self.log.push((start, self.value[start..end].to_vec()));
        match self.log.last_mut() {
            Some((_, bytes)) => Ok(bytes.as_mut_slice()),
            None => Err(fail(Status::UnknownError, "staging log out of sync")),
        }
    }

    fn commit(&mut self) -> Result<()> {
        txscope::check()?;
        let key = self.current_key()?.to_vec();
        if self.log.is_empty() {
            return Ok(());
        }

        let mut merged = self.value.clone();
        for (start, bytes) in &self.log {
            merged[*start..*start + bytes.len()].copy_from_slice(bytes);
        }

        {
            let tree = self.engine.write_tree();
            let Some((leaf_id, slot)) = self.engine.lookup(&tree, &key) else {
                return Err(fail(Status::NotFound, "element vanished before commit"));
            };
            LeafRef::new(&self.engine.region, leaf_id).touch_epoch(tree.epoch)?;
            self.engine
                .update_value_locked(&tree, leaf_id, slot, &merged)?;
        }

        self.value = merged;
        self.log.clear();
        Ok(())
    }

    fn abort(&mut self) {
        self.log.clear();
    }
}
