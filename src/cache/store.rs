//! Line-associative flow store.
//!
//! The store maps a 64-bit key hash to a slot. Slots are grouped into
//! lines of `line_size` entries; a hash selects its line via `line_mask`
//! and the line is scanned linearly. Within a line the slots are kept in
//! LRU order, most recent first.
//!
//! Lines hold *boxed* records: LRU promotion and export both move boxes,
//! never record payloads, so extension lists stay pinned while a flow
//! lives in the cache.

use crate::cache::ring::ExportRing;
use crate::config::CacheConfig;
use crate::error::{ConfigError, RingError};
use crate::flow::{FlowKey, FlowRecord};

/// Index of a slot in the store. Valid until the next promotion touching
/// its line.
pub type SlotIndex = usize;

/// Line-associative, open-addressed flow store.
pub struct FlowStore {
    slots: Vec<Box<FlowRecord>>,
    cache_size: usize,
    line_size: usize,
    line_mask: usize,

    // Line-scan length accounting (sum and sum of squares).
    lookups: u64,
    lookups_sq: u64,
}

impl FlowStore {
    /// Allocate a store per `cfg`. All records are allocated up front;
    /// the per-packet path never allocates.
    pub fn new(cfg: &CacheConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let cache_size = cfg.cache_size();
        let line_size = cfg.line_size();
        let slots = (0..cache_size)
            .map(|_| Box::new(FlowRecord::empty()))
            .collect();

        Ok(Self {
            slots,
            cache_size,
            line_size,
            line_mask: (cache_size - 1) & !(line_size - 1),
            lookups: 0,
            lookups_sq: 0,
        })
    }

    /// Total number of slots.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Slots per line.
    pub fn line_size(&self) -> usize {
        self.line_size
    }

    /// First slot of the line owning `hash`.
    fn line_index(&self, hash: u64) -> usize {
        (hash as usize) & self.line_mask
    }

    /// Scan the key's line for a slot holding exactly this hash.
    pub fn lookup(&self, key: &FlowKey) -> Option<SlotIndex> {
        let line = self.line_index(key.hash());
        (line..line + self.line_size).find(|&i| self.slots[i].hash() == key.hash())
    }

    /// Scan the key's line for the first empty slot.
    pub fn lookup_empty(&self, key: &FlowKey) -> Option<SlotIndex> {
        let line = self.line_index(key.hash());
        (line..line + self.line_size).find(|&i| self.slots[i].is_empty())
    }

    /// The line's LRU victim: its last slot.
    pub fn free(&self, key: &FlowKey) -> SlotIndex {
        self.line_index(key.hash()) + self.line_size - 1
    }

    /// Promote the slot to the head of its line and return the head
    /// index. Rotates boxes within the line; records do not move.
    pub fn put(&mut self, idx: SlotIndex) -> SlotIndex {
        let line = idx & self.line_mask;
        let scan_len = (idx - line + 1) as u64;
        self.lookups += scan_len;
        self.lookups_sq += scan_len * scan_len;

        self.slots[line..=idx].rotate_right(1);
        line
    }

    /// Hand the record at `idx` to the export ring and install the empty
    /// record received in exchange. Blocks while the ring is full.
    pub fn index_export(&mut self, idx: SlotIndex, ring: &ExportRing) -> Result<(), RingError> {
        let mut fresh = ring.acquire()?;
        fresh.erase();
        let completed = std::mem::replace(&mut self.slots[idx], fresh);
        ring.push(completed)
    }

    /// Shared access to the record at `idx`.
    pub fn record(&self, idx: SlotIndex) -> &FlowRecord {
        &self.slots[idx]
    }

    /// Exclusive access to the record at `idx`.
    pub fn record_mut(&mut self, idx: SlotIndex) -> &mut FlowRecord {
        &mut self.slots[idx]
    }

    /// Iterate all slots in storage order (timeout sweeps, final flush).
    pub fn iter(&self) -> impl Iterator<Item = &FlowRecord> {
        self.slots.iter().map(|b| b.as_ref())
    }

    /// Accumulated line-scan statistics: (sum, sum of squares).
    pub fn lookup_stats(&self) -> (u64, u64) {
        (self.lookups, self.lookups_sq)
    }
}
