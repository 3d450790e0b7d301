//! Keyed node index embedded in the top of the region.
//!
//! Layout, from the end of the file downward:
//!
//! ```text
//! | ... blobs -> |  free  | <- node N-1 | ... | node 0 | slot heads |
//!                         ^ index_low            ^ slots_start      ^ size
//! ```
//!
//! Each slot holds the first node of a hash chain. Every node carries one
//! cache entry and is either active (linked from a slot) or free (linked from
//! the free list in the header). Nodes never move, so node ids stay valid
//! across removals and restarts.

use super::header::{ACTIVE_COUNT_AT, FREE_HEAD_AT, HEADER_SIZE, NODE_COUNT_AT, SLOT_COUNT_AT};
use super::region::Region;
use crate::error::{CacheError, Result};
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const NODE_SIZE: usize = 32;
const SLOT_SIZE: usize = 4;
const NIL: i32 = -1;

const NEXT: usize = 0;
const BUCKET: usize = 4;
const KEY_HASH: usize = 8;
const OFFSET: usize = 12;
const TTL: usize = 16;
const ORIGINAL_TTL: usize = 20;
const LENGTH: usize = 24;
const USED: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn get(self) -> u32 {
        self.0
    }

    fn from_link(link: i32) -> Option<Self> {
        u32::try_from(link).ok().map(NodeId)
    }

    fn link(node: Option<Self>) -> i32 {
        node.map(|n| n.0 as i32).unwrap_or(NIL)
    }
}

/// Payload of one index node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// Start of the blob in the region
    pub offset: u32,
    /// Remaining lifetime in sweep ticks
    pub ttl: u32,
    /// TTL as received from upstream, in seconds
    pub original_ttl: u32,
    /// Zone length, a multiple of 8; 0 once the zone has been given back
    pub length: u32,
    /// Bytes of the zone holding the blob
    pub used: u32,
}

/// Hash of an index key, persisted in the node.
pub(crate) fn hash_key(key: &[u8]) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(key);
    hasher.finish() as u32
}

/// Number of hash slots for a region of `size` bytes.
pub(crate) fn slot_count_for(size: usize) -> u32 {
    let estimate = if size < 1_048_576 {
        (size / 4979) as i64 - 18
    } else {
        (size as f64).ln().powi(2) as i64
    };
    let rounded = (estimate + 5).div_euclid(10) * 10;
    (rounded.max(0) + 6) as u32
}

fn slot_bytes(slot_count: u32) -> usize {
    (slot_count as usize * SLOT_SIZE + 7) & !7
}

/// Lay out an empty index at the top of a freshly created region.
pub(crate) fn format(region: &mut Region) -> Result<()> {
    let size = region.size();
    let slot_count = slot_count_for(size);
    let slots_start = size - slot_bytes(slot_count);
    for slot in 0..slot_count as usize {
        region.write_i32(slots_start + slot * SLOT_SIZE, NIL)?;
    }
    region.write_u32(SLOT_COUNT_AT, slot_count)?;
    region.write_u32(NODE_COUNT_AT, 0)?;
    region.write_i32(FREE_HEAD_AT, NIL)?;
    region.write_u32(ACTIVE_COUNT_AT, 0)?;
    Ok(())
}

/// Read access to the index.
#[derive(Clone, Copy)]
pub(crate) struct NodeIndex<'r> {
    region: &'r Region,
}

impl<'r> NodeIndex<'r> {
    pub(crate) fn new(region: &'r Region) -> Self {
        Self { region }
    }

    pub(crate) fn region(&self) -> &'r Region {
        self.region
    }

    pub(crate) fn slot_count(&self) -> Result<u32> {
        self.region.read_u32(SLOT_COUNT_AT)
    }

    pub(crate) fn node_count(&self) -> Result<u32> {
        self.region.read_u32(NODE_COUNT_AT)
    }

    pub(crate) fn active_count(&self) -> Result<u32> {
        self.region.read_u32(ACTIVE_COUNT_AT)
    }

    fn free_head(&self) -> Result<Option<NodeId>> {
        self.region.read_i32(FREE_HEAD_AT).map(NodeId::from_link)
    }

    fn slots_start(&self) -> Result<usize> {
        let slots = slot_bytes(self.slot_count()?);
        self.region
            .size()
            .checked_sub(slots)
            .ok_or_else(|| CacheError::Corrupt(format!("{} slot bytes exceed region", slots)))
    }

    /// Lowest byte used by the index arena.
    pub(crate) fn index_low(&self) -> Result<usize> {
        let nodes = self.node_count()? as usize * NODE_SIZE;
        self.slots_start()?
            .checked_sub(nodes)
            .ok_or_else(|| CacheError::Corrupt(format!("{} node bytes exceed region", nodes)))
    }

    /// Bytes taken by slots and nodes together.
    pub(crate) fn index_bytes(&self) -> Result<usize> {
        Ok(self.region.size() - self.index_low()?)
    }

    fn slot_at(&self, bucket: u32) -> Result<usize> {
        Ok(self.slots_start()? + bucket as usize * SLOT_SIZE)
    }

    fn node_at(&self, node: NodeId) -> Result<usize> {
        if node.0 >= self.node_count()? {
            return Err(CacheError::Corrupt(format!("node {} out of range", node.0)));
        }
        Ok(self.slots_start()? - (node.0 as usize + 1) * NODE_SIZE)
    }

    fn field(&self, node: NodeId, field: usize) -> Result<u32> {
        self.region.read_u32(self.node_at(node)? + field)
    }

    fn next(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.region
            .read_i32(self.node_at(node)? + NEXT)
            .map(NodeId::from_link)
    }

    pub(crate) fn nodes(&self) -> Result<impl Iterator<Item = NodeId> + use<>> {
        Ok((0..self.node_count()?).map(NodeId))
    }

    pub(crate) fn is_active(&self, node: NodeId) -> Result<bool> {
        Ok(self.region.read_i32(self.node_at(node)? + BUCKET)? != NIL)
    }

    pub(crate) fn key_hash(&self, node: NodeId) -> Result<u32> {
        self.field(node, KEY_HASH)
    }

    /// Shared counter holding the node's remaining TTL.
    pub(crate) fn ttl_cell(&self, node: NodeId) -> Result<&'r AtomicU32> {
        self.region.atomic_u32(self.node_at(node)? + TTL)
    }

    pub(crate) fn entry(&self, node: NodeId) -> Result<CacheEntry> {
        let ttl = self.ttl_cell(node)?.load(Ordering::Acquire);
        Ok(CacheEntry {
            offset: self.field(node, OFFSET)?,
            ttl,
            original_ttl: self.field(node, ORIGINAL_TTL)?,
            length: self.field(node, LENGTH)?,
            used: self.field(node, USED)?,
        })
    }

    /// Stored blob of an entry.
    pub(crate) fn blob(&self, entry: &CacheEntry) -> Result<&'r [u8]> {
        self.region
            .bytes(entry.offset as usize, entry.used as usize)
    }

    /// Next active node after `after` (or the first one) whose key hash is
    /// `key_hash`. Callers confirm the key itself against the blob.
    pub(crate) fn get(&self, key_hash: u32, after: Option<NodeId>) -> Result<Option<NodeId>> {
        let mut current = match after {
            Some(node) => self.next(node)?,
            None => {
                let bucket = key_hash % self.slot_count()?;
                NodeId::from_link(self.region.read_i32(self.slot_at(bucket)?)?)
            }
        };
        let mut steps = 0u32;
        let limit = self.node_count()?;
        while let Some(node) = current {
            if self.key_hash(node)? == key_hash {
                return Ok(Some(node));
            }
            steps += 1;
            if steps > limit {
                return Err(CacheError::Corrupt("hash chain loops".to_string()));
            }
            current = self.next(node)?;
        }
        Ok(None)
    }

    /// Next active node whose blob starts with `key`.
    pub(crate) fn find(&self, key: &[u8], after: Option<NodeId>) -> Result<Option<NodeId>> {
        let key_hash = hash_key(key);
        let mut cursor = after;
        while let Some(node) = self.get(key_hash, cursor)? {
            let entry = self.entry(node)?;
            let blob = self.blob(&entry)?;
            if blob.len() > key.len() && &blob[1..=key.len()] == key {
                return Ok(Some(node));
            }
            cursor = Some(node);
        }
        Ok(None)
    }

    /// Walk the free list; `cursor` is the node returned by the previous call.
    pub(crate) fn find_unused_node(&self, cursor: Option<NodeId>) -> Result<Option<NodeId>> {
        match cursor {
            None => self.free_head(),
            Some(node) => self.next(node),
        }
    }

    /// Check the persisted geometry of a reloaded region.
    pub(crate) fn validate(&self) -> Result<()> {
        let slot_count = self.slot_count()?;
        if slot_count == 0 {
            return Err(CacheError::Corrupt("no hash slots".to_string()));
        }
        let index_low = self.index_low()?;
        let end = self.region.end()?;
        if end < HEADER_SIZE || end > index_low {
            return Err(CacheError::Corrupt(format!(
                "blob end {} outside [{}, {}]",
                end, HEADER_SIZE, index_low
            )));
        }
        let node_count = self.node_count()?;
        if let Some(head) = self.free_head()? {
            if head.0 >= node_count {
                return Err(CacheError::Corrupt(format!(
                    "free head {} out of range",
                    head.0
                )));
            }
        }
        if self.active_count()? > node_count {
            return Err(CacheError::Corrupt(
                "active count exceeds node count".to_string(),
            ));
        }
        Ok(())
    }
}

/// Write access to the index.
pub(crate) struct NodeIndexMut<'r> {
    region: &'r mut Region,
}

impl<'r> NodeIndexMut<'r> {
    pub(crate) fn new(region: &'r mut Region) -> Self {
        Self { region }
    }

    pub(crate) fn view(&self) -> NodeIndex<'_> {
        NodeIndex::new(self.region)
    }

    pub(crate) fn region_mut(&mut self) -> &mut Region {
        &mut *self.region
    }

    fn set_field(&mut self, node: NodeId, field: usize, value: u32) -> Result<()> {
        let at = self.view().node_at(node)? + field;
        self.region.write_u32(at, value)
    }

    fn set_next(&mut self, node: NodeId, next: Option<NodeId>) -> Result<()> {
        self.set_field(node, NEXT, NodeId::link(next) as u32)
    }

    fn set_free_head(&mut self, node: Option<NodeId>) -> Result<()> {
        self.region.write_i32(FREE_HEAD_AT, NodeId::link(node))
    }

    fn adjust_active(&mut self, delta: i32) -> Result<()> {
        let active = self.view().active_count()?;
        self.region
            .write_u32(ACTIVE_COUNT_AT, active.saturating_add_signed(delta))
    }

    /// Carve a new free-standing node out of the index arena. Fails when the
    /// arena would drop below `blob_limit`.
    pub(crate) fn create_node(&mut self, blob_limit: usize) -> Result<NodeId> {
        let view = self.view();
        let index_low = view.index_low()?;
        let node_count = view.node_count()?;
        let available = index_low.saturating_sub(blob_limit);
        if available < NODE_SIZE || node_count >= i32::MAX as u32 {
            return Err(CacheError::ArenaFull {
                need: NODE_SIZE,
                available,
            });
        }

        self.region.write_u32(NODE_COUNT_AT, node_count + 1)?;
        let node = NodeId(node_count);
        let at = self.view().node_at(node)?;
        self.region.bytes_mut(at, NODE_SIZE)?.fill(0);
        self.set_next(node, None)?;
        self.set_field(node, BUCKET, NIL as u32)?;
        Ok(node)
    }

    /// Detach a node from the free list.
    pub(crate) fn fetch_node(&mut self, node: NodeId) -> Result<()> {
        let view = self.view();
        let mut previous = None;
        let mut current = view.free_head()?;
        while let Some(candidate) = current {
            if candidate == node {
                let next = view.next(node)?;
                match previous {
                    None => self.set_free_head(next)?,
                    Some(prev) => self.set_next(prev, next)?,
                }
                return self.set_next(node, None);
            }
            previous = Some(candidate);
            current = view.next(candidate)?;
        }
        Err(CacheError::Corrupt(format!(
            "node {} is not on the free list",
            node.0
        )))
    }

    /// Link a detached node into the chain for `key_hash`, after existing
    /// nodes so entries of one key keep insertion order.
    pub(crate) fn add_by_key(&mut self, key_hash: u32, node: NodeId) -> Result<()> {
        let view = self.view();
        let bucket = key_hash % view.slot_count()?;
        let slot = view.slot_at(bucket)?;
        let mut tail = None;
        let mut current = NodeId::from_link(self.region.read_i32(slot)?);
        while let Some(candidate) = current {
            tail = Some(candidate);
            current = self.view().next(candidate)?;
        }

        self.set_field(node, KEY_HASH, key_hash)?;
        self.set_field(node, BUCKET, bucket)?;
        self.set_next(node, None)?;
        match tail {
            None => self.region.write_i32(slot, NodeId::link(Some(node)))?,
            Some(last) => self.set_next(last, Some(node))?,
        }
        self.adjust_active(1)
    }

    /// Unlink an active node and push it on the free list. Its entry, and in
    /// particular its zone, is left in place for reuse.
    pub(crate) fn remove_node(&mut self, node: NodeId) -> Result<()> {
        let view = self.view();
        let bucket = view.field(node, BUCKET)? as i32;
        if bucket == NIL {
            return Err(CacheError::Corrupt(format!(
                "node {} is not active",
                node.0
            )));
        }
        let slot = view.slot_at(bucket as u32)?;
        let next = view.next(node)?;

        let mut previous = None;
        let mut current = NodeId::from_link(self.region.read_i32(slot)?);
        while let Some(candidate) = current {
            if candidate == node {
                break;
            }
            previous = Some(candidate);
            current = self.view().next(candidate)?;
        }
        if current.is_none() {
            return Err(CacheError::Corrupt(format!(
                "node {} missing from its chain",
                node.0
            )));
        }
        match previous {
            None => self.region.write_i32(slot, NodeId::link(next))?,
            Some(prev) => self.set_next(prev, next)?,
        }

        let free_head = self.view().free_head()?;
        self.set_field(node, BUCKET, NIL as u32)?;
        self.set_next(node, free_head)?;
        self.set_free_head(Some(node))?;
        self.adjust_active(-1)
    }

    pub(crate) fn set_zone(
        &mut self,
        node: NodeId,
        offset: usize,
        length: usize,
        used: usize,
    ) -> Result<()> {
        let too_far = |v: usize| CacheError::OutOfBounds {
            offset: v,
            len: 0,
            size: u32::MAX as usize,
        };
        self.set_field(
            node,
            OFFSET,
            u32::try_from(offset).map_err(|_| too_far(offset))?,
        )?;
        self.set_field(
            node,
            LENGTH,
            u32::try_from(length).map_err(|_| too_far(length))?,
        )?;
        self.set_field(node, USED, u32::try_from(used).map_err(|_| too_far(used))?)
    }

    /// Forget a free node's zone so it is never matched for reuse.
    pub(crate) fn clear_zone(&mut self, node: NodeId) -> Result<()> {
        self.set_field(node, LENGTH, 0)?;
        self.set_field(node, USED, 0)
    }

    pub(crate) fn set_ttl(&mut self, node: NodeId, ttl: u32, original_ttl: u32) -> Result<()> {
        self.view().ttl_cell(node)?.store(ttl, Ordering::Release);
        self.set_field(node, ORIGINAL_TTL, original_ttl)
    }
}
