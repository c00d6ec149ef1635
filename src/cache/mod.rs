//! The flow cache: per-packet orchestration over the flow store.
//!
//! For each incoming packet the cache derives the flow key, matches the
//! packet against the store (including the inverse tuple for bi-flow
//! collapsing), applies the timeout policy, dispatches the plugin
//! pipeline at the lifecycle hooks, and hands completed flows to the
//! export ring. The whole module is single-threaded; all concurrency is
//! between workers, at the ring boundaries.

pub mod ring;
pub mod store;

use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{ConfigError, RingError};
use crate::flow::{EndReason, FlowKey, FlowRecord};
use crate::packet::{Packet, Timeval};
use crate::process::{PluginAction, PluginPipeline};

pub use ring::{export_ring, ExportRing, ExportSink};
pub use store::{FlowStore, SlotIndex};

const TCP_FIN: u8 = 0x01;
const TCP_SYN: u8 = 0x02;
const TCP_RST: u8 = 0x04;

/// Counters describing cache behaviour since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Packets matched to an existing flow.
    pub hits: u64,
    /// Flows created in an empty slot.
    pub empty: u64,
    /// Packets folded into an occupied slot.
    pub not_empty: u64,
    /// Flows exported by a timeout.
    pub expired: u64,
    /// Plugin-requested flushes.
    pub flushed: u64,
    /// Total flows handed to the export ring.
    pub exported: u64,
    /// Packets dropped before key derivation.
    pub dropped: u64,
    /// Sum of line-scan lengths.
    pub lookups: u64,
    /// Sum of squared line-scan lengths.
    pub lookups_sq: u64,
}

impl CacheStats {
    /// Mean line-scan length per hit.
    pub fn avg_lookup(&self) -> f64 {
        if self.hits == 0 {
            0.0
        } else {
            self.lookups as f64 / self.hits as f64
        }
    }
}

/// Per-direction state captured before a record update, so a
/// reinsert/terminate flush can export the flow exactly as it was before
/// the triggering packet.
#[derive(Debug, Clone, Copy)]
struct UpdateSnapshot {
    time_last: Timeval,
    src_tcp_flags: u8,
    dst_tcp_flags: u8,
}

/// The flow cache. Owned and driven by exactly one storage worker.
pub struct FlowCache {
    store: FlowStore,
    ring: ExportRing,
    pipeline: PluginPipeline,

    active: i64,
    inactive: i64,
    timeout_step: usize,
    split_biflow: bool,

    sweep_cursor: usize,
    stats: CacheStats,
}

impl FlowCache {
    /// Build a cache over a validated configuration.
    pub fn new(
        cfg: &CacheConfig,
        pipeline: PluginPipeline,
        ring: ExportRing,
    ) -> Result<Self, ConfigError> {
        let store = FlowStore::new(cfg)?;
        Ok(Self {
            store,
            ring,
            pipeline,
            active: cfg.active_timeout as i64,
            inactive: cfg.inactive_timeout as i64,
            timeout_step: cfg.timeout_step as usize,
            split_biflow: cfg.split_biflow,
            sweep_cursor: 0,
            stats: CacheStats::default(),
        })
    }

    /// Process one packet.
    ///
    /// Errors only when the export ring has been closed by the consumer;
    /// malformed packets are silently dropped here, at the cache
    /// boundary.
    pub fn put_packet(&mut self, pkt: &mut Packet) -> Result<(), RingError> {
        let action = self.pipeline.pre_create(pkt);
        if action.contains(PluginAction::DISCARD) {
            self.stats.dropped += 1;
            return Ok(());
        }

        let Some(mut key) = FlowKey::from_packet(pkt, false) else {
            self.stats.dropped += 1;
            return Ok(());
        };

        let mut source = true;
        let mut found = self.store.lookup(&key);

        // Bi-flow: a miss retries with the transposed tuple so replies
        // collapse into the same record.
        if found.is_none() && !self.split_biflow {
            if let Some(inv_key) = FlowKey::from_packet(pkt, true) {
                if let Some(idx) = self.store.lookup(&inv_key) {
                    key = inv_key;
                    found = Some(idx);
                    source = false;
                }
            }
        }

        let idx = match found {
            Some(idx) => {
                self.stats.hits += 1;
                self.store.put(idx)
            }
            None => match self.store.lookup_empty(&key) {
                // A new flow is the line's most recent entry: rotate the
                // empty slot to the head before seeding it, so untouched
                // flows drift toward the eviction end.
                Some(idx) => self.store.put(idx),
                None => {
                    // Line full: evict its LRU victim at the tail.
                    let victim = self.store.free(&key);
                    let head = self.store.put(victim);
                    self.export_at(head, EndReason::NoResource)?;
                    head
                }
            },
        };

        pkt.source_pkt = source;

        if self.store.record(idx).is_empty() {
            self.store.record_mut(idx).create(pkt, key.hash());
            self.stats.empty += 1;

            let action = self.pipeline.post_create(self.store.record_mut(idx), pkt);
            if action.contains(PluginAction::ERROR) {
                self.export_at(idx, EndReason::NoResource)?;
            } else if action.wants_flush() {
                self.stats.flushed += 1;
                self.export_at(idx, EndReason::Forced)?;
            }
            return Ok(());
        }

        self.stats.not_empty += 1;

        // TCP restart: a SYN against a direction that already saw FIN or
        // RST ends the old flow and opens a new one from this packet.
        let rec = self.store.record(idx);
        let dir_flags = if source {
            rec.src_tcp_flags
        } else {
            rec.dst_tcp_flags
        };
        if pkt.tcp_flags & TCP_SYN != 0 && dir_flags & (TCP_FIN | TCP_RST) != 0 {
            self.export_at(idx, EndReason::EndOfFlow)?;
            return self.put_packet(pkt);
        }

        // Inactive timeout against the packet's own clock.
        if pkt.ts.secs - rec.time_last.secs >= self.inactive {
            self.export_at(idx, EndReason::Inactive)?;
            self.stats.expired += 1;
            return self.put_packet(pkt);
        }

        let action = self.pipeline.pre_update(self.store.record_mut(idx), pkt);
        if action.contains(PluginAction::ERROR) {
            self.export_at(idx, EndReason::NoResource)?;
            return self.put_packet(pkt);
        }
        if action.wants_flush() {
            return self.flush(pkt, idx, action, None);
        }

        let rec = self.store.record(idx);
        let snapshot = UpdateSnapshot {
            time_last: rec.time_last,
            src_tcp_flags: rec.src_tcp_flags,
            dst_tcp_flags: rec.dst_tcp_flags,
        };
        self.store.record_mut(idx).update(pkt, source);

        let action = self.pipeline.post_update(self.store.record_mut(idx), pkt);
        if action.contains(PluginAction::ERROR) {
            self.export_at(idx, EndReason::NoResource)?;
            return Ok(());
        }
        if action.wants_flush() {
            return self.flush(pkt, idx, action, Some(snapshot));
        }

        if pkt.ts.secs - self.store.record(idx).time_first.secs >= self.active {
            self.export_at(idx, EndReason::Active)?;
            self.stats.expired += 1;
        }

        self.sweep_expired(pkt.ts.secs)
    }

    /// Plugin-requested flush of the flow at `idx`.
    ///
    /// When the trigger was `post_update`, `snapshot` lets reinsert and
    /// terminate roll the triggering packet back out of the exported
    /// record, so that packet is accounted to the successor flow only.
    fn flush(
        &mut self,
        pkt: &mut Packet,
        idx: SlotIndex,
        action: PluginAction,
        snapshot: Option<UpdateSnapshot>,
    ) -> Result<(), RingError> {
        self.stats.flushed += 1;
        let source = pkt.source_pkt;

        if action.contains(PluginAction::FLUSH_WITH_REINSERT) {
            if let Some(snap) = snapshot {
                rollback_update(self.store.record_mut(idx), pkt, source, snap);
            }
            let seed = self.store.record(idx).reseeded(pkt.ts);
            self.export_at(idx, EndReason::Forced)?;

            let rec = self.store.record_mut(idx);
            *rec = seed;
            rec.update(pkt, source);

            let action = self.pipeline.post_create(self.store.record_mut(idx), pkt);
            if action.contains(PluginAction::ERROR) {
                return self.export_at(idx, EndReason::NoResource);
            }
            if action.wants_flush() {
                return self.flush(pkt, idx, action, None);
            }
            Ok(())
        } else if action.contains(PluginAction::TERMINATE_FLOW) {
            if let Some(snap) = snapshot {
                rollback_update(self.store.record_mut(idx), pkt, source, snap);
            }
            self.export_at(idx, EndReason::Forced)?;
            self.put_packet(pkt)
        } else {
            self.export_at(idx, EndReason::Forced)
        }
    }

    /// Export every expired slot in the next sweep window. The cursor
    /// advances `timeout_step` slots per packet and wraps.
    fn sweep_expired(&mut self, now_secs: i64) -> Result<(), RingError> {
        let mask = self.store.cache_size() - 1;
        for k in 0..self.timeout_step {
            let i = (self.sweep_cursor + k) & mask;
            let rec = self.store.record(i);
            if !rec.is_empty() && now_secs - rec.time_last.secs >= self.inactive {
                self.export_at(i, EndReason::Inactive)?;
                self.stats.expired += 1;
            }
        }
        self.sweep_cursor = (self.sweep_cursor + self.timeout_step) & mask;
        Ok(())
    }

    /// Shutdown sweep: export every live flow with reason Forced.
    pub fn finish(&mut self) -> Result<(), RingError> {
        for i in 0..self.store.cache_size() {
            if !self.store.record(i).is_empty() {
                self.export_at(i, EndReason::Forced)?;
                self.stats.expired += 1;
            }
        }
        debug!(exported = self.stats.exported, "flow cache finished");
        Ok(())
    }

    /// Stamp the reason, run `pre_export`, and swap the record into the
    /// ring. Once this returns the slot holds a fresh empty record.
    fn export_at(&mut self, idx: SlotIndex, reason: EndReason) -> Result<(), RingError> {
        let rec = self.store.record_mut(idx);
        rec.end_reason = Some(reason);
        self.pipeline.pre_export(rec);
        self.store.index_export(idx, &self.ring)?;
        self.stats.exported += 1;
        Ok(())
    }

    /// Snapshot of the cache counters, including store scan lengths.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats;
        let (lookups, lookups_sq) = self.store.lookup_stats();
        stats.lookups = lookups;
        stats.lookups_sq = lookups_sq;
        stats
    }
}

/// Undo one `FlowRecord::update`, restoring the pre-update snapshot.
fn rollback_update(rec: &mut FlowRecord, pkt: &Packet, source: bool, snap: UpdateSnapshot) {
    if source {
        rec.src_packets -= 1;
        rec.src_bytes -= u64::from(pkt.ip_len);
    } else {
        rec.dst_packets -= 1;
        rec.dst_bytes -= u64::from(pkt.ip_len);
    }
    rec.time_last = snap.time_last;
    rec.src_tcp_flags = snap.src_tcp_flags;
    rec.dst_tcp_flags = snap.dst_tcp_flags;
}
