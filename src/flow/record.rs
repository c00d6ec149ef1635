//! The flow record: per-direction counters plus plugin extensions.
//!
//! A record with hash zero is an empty cache slot. Records are created in
//! place from the first packet, updated per packet, and erased when they
//! return from the export ring.

use std::net::{IpAddr, Ipv4Addr};

use smallvec::SmallVec;

use crate::flow::ext::{Extension, ExtensionId};
use crate::packet::{Packet, Timeval};

/// Why a flow left the cache. Final once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Flow duration reached the active timeout.
    Active = 1,
    /// Idle gap reached the inactive timeout.
    Inactive = 2,
    /// Protocol end observed (TCP restart heuristic).
    EndOfFlow = 3,
    /// Plugin-requested flush or shutdown sweep.
    Forced = 4,
    /// Evicted to make room, or plugin-declared failure.
    NoResource = 5,
}

/// One bidirectional flow record.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    hash: u64,

    /// Timestamp of the first packet mapped to this flow.
    pub time_first: Timeval,
    /// Timestamp of the most recent packet.
    pub time_last: Timeval,

    /// Source address as seen by the flow-creating packet.
    pub src_ip: IpAddr,
    /// Destination address as seen by the flow-creating packet.
    pub dst_ip: IpAddr,
    /// Source port of the flow-creating packet.
    pub src_port: u16,
    /// Destination port of the flow-creating packet.
    pub dst_port: u16,
    /// L4 protocol number.
    pub ip_proto: u8,
    /// IP version (4 or 6).
    pub ip_version: u8,

    /// Packets counted in the source direction.
    pub src_packets: u32,
    /// Packets counted in the destination direction.
    pub dst_packets: u32,
    /// Bytes (IP length) in the source direction.
    pub src_bytes: u64,
    /// Bytes (IP length) in the destination direction.
    pub dst_bytes: u64,
    /// Union of TCP flags seen in the source direction.
    pub src_tcp_flags: u8,
    /// Union of TCP flags seen in the destination direction.
    pub dst_tcp_flags: u8,

    /// Export reason; `None` while the flow is live.
    pub end_reason: Option<EndReason>,

    extensions: SmallVec<[Extension; 2]>,
}

impl FlowRecord {
    /// A fresh empty record (hash zero).
    pub fn empty() -> Self {
        Self {
            hash: 0,
            time_first: Timeval::default(),
            time_last: Timeval::default(),
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            ip_proto: 0,
            ip_version: 0,
            src_packets: 0,
            dst_packets: 0,
            src_bytes: 0,
            dst_bytes: 0,
            src_tcp_flags: 0,
            dst_tcp_flags: 0,
            end_reason: None,
            extensions: SmallVec::new(),
        }
    }

    /// The key hash of the occupying flow, zero when empty.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether this record is an empty slot.
    pub fn is_empty(&self) -> bool {
        self.hash == 0
    }

    /// Reset to an empty slot. Drops all extensions.
    pub fn erase(&mut self) {
        *self = Self::empty();
    }

    /// Keep the key and identity, zero the traffic counters, and restart
    /// the flow clock at the previous last-seen timestamp. Used when a
    /// flow is re-seeded in place after a forced export.
    pub fn reuse(&mut self) {
        self.time_first = self.time_last;
        self.src_packets = 0;
        self.dst_packets = 0;
        self.src_bytes = 0;
        self.dst_bytes = 0;
        self.src_tcp_flags = 0;
        self.dst_tcp_flags = 0;
        self.end_reason = None;
    }

    /// A fresh record carrying only this record's identity (key hash and
    /// five-tuple), with zeroed counters, no extensions, and the flow
    /// clock started at `ts`. Used to re-seed a slot after a forced
    /// export so the next segment of the conversation keys identically.
    pub fn reseeded(&self, ts: Timeval) -> FlowRecord {
        let mut rec = FlowRecord::empty();
        rec.hash = self.hash;
        rec.src_ip = self.src_ip;
        rec.dst_ip = self.dst_ip;
        rec.src_port = self.src_port;
        rec.dst_port = self.dst_port;
        rec.ip_proto = self.ip_proto;
        rec.ip_version = self.ip_version;
        rec.time_first = ts;
        rec.time_last = ts;
        rec
    }

    /// Initialize an empty slot from the first packet of a flow.
    ///
    /// The record keeps the packet's orientation: the packet's source
    /// becomes the flow's source direction.
    pub fn create(&mut self, pkt: &Packet, hash: u64) {
        debug_assert_ne!(hash, 0, "live flow must not use the empty-slot hash");
        self.hash = hash;
        self.time_first = pkt.ts;
        self.time_last = pkt.ts;
        self.src_ip = pkt.src_ip;
        self.dst_ip = pkt.dst_ip;
        self.src_port = pkt.src_port;
        self.dst_port = pkt.dst_port;
        self.ip_proto = pkt.ip_proto;
        self.ip_version = pkt.ip_version();
        self.src_packets = 0;
        self.dst_packets = 0;
        self.src_bytes = 0;
        self.dst_bytes = 0;
        self.src_tcp_flags = 0;
        self.dst_tcp_flags = 0;
        self.end_reason = None;
        self.extensions.clear();
        self.update(pkt, true);
    }

    /// Fold one packet into the record. `source` selects the direction.
    pub fn update(&mut self, pkt: &Packet, source: bool) {
        if source {
            self.src_packets += 1;
            self.src_bytes += u64::from(pkt.ip_len);
            self.src_tcp_flags |= pkt.tcp_flags;
        } else {
            self.dst_packets += 1;
            self.dst_bytes += u64::from(pkt.ip_len);
            self.dst_tcp_flags |= pkt.tcp_flags;
        }
        if pkt.ts > self.time_last {
            self.time_last = pkt.ts;
        }
    }

    /// Total packets in both directions.
    pub fn total_packets(&self) -> u32 {
        self.src_packets + self.dst_packets
    }

    /// Attach an extension, replacing any existing one with the same id.
    pub fn add_extension(&mut self, ext: Extension) {
        let id = ext.id();
        if let Some(slot) = self.extensions.iter_mut().find(|e| e.id() == id) {
            *slot = ext;
        } else {
            self.extensions.push(ext);
        }
    }

    /// Look up the extension attached by the plugin with `id`.
    pub fn extension(&self, id: ExtensionId) -> Option<&Extension> {
        self.extensions.iter().find(|e| e.id() == id)
    }

    /// Mutable lookup of the extension attached by the plugin with `id`.
    pub fn extension_mut(&mut self, id: ExtensionId) -> Option<&mut Extension> {
        self.extensions.iter_mut().find(|e| e.id() == id)
    }

    /// Detach the extension with `id`, if attached.
    pub fn remove_extension(&mut self, id: ExtensionId) {
        self.extensions.retain(|e| e.id() != id);
    }

    /// Detach all extensions.
    pub fn clear_extensions(&mut self) {
        self.extensions.clear();
    }

    /// Attached extensions in attach order.
    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }
}

impl Default for FlowRecord {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::ext::{EXT_BASIC_PLUS, EXT_RTP};
    use crate::process::basic_plus::BasicPlusData;
    use crate::process::rtp::RtpData;

    fn pkt_at(secs: i64) -> Packet {
        Packet {
            ts: Timeval::new(secs, 0),
            ip_len: 100,
            tcp_flags: 0x02,
            ip_proto: 6,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_record_has_zero_hash() {
        let rec = FlowRecord::empty();
        assert!(rec.is_empty());
        assert_eq!(rec.hash(), 0);
    }

    #[test]
    fn test_create_counts_first_packet() {
        let mut rec = FlowRecord::empty();
        rec.create(&pkt_at(5), 42);

        assert!(!rec.is_empty());
        assert_eq!(rec.src_packets, 1);
        assert_eq!(rec.dst_packets, 0);
        assert_eq!(rec.src_bytes, 100);
        assert_eq!(rec.src_tcp_flags, 0x02);
        assert_eq!(rec.time_first, rec.time_last);
    }

    #[test]
    fn test_update_directions() {
        let mut rec = FlowRecord::empty();
        rec.create(&pkt_at(5), 42);

        let mut reply = pkt_at(6);
        reply.tcp_flags = 0x12; // SYN|ACK
        rec.update(&reply, false);

        assert_eq!(rec.src_packets, 1);
        assert_eq!(rec.dst_packets, 1);
        assert_eq!(rec.dst_tcp_flags, 0x12);
        assert_eq!(rec.time_last, Timeval::new(6, 0));
        assert!(rec.time_first <= rec.time_last);
    }

    #[test]
    fn test_reuse_keeps_key_zeroes_counters() {
        let mut rec = FlowRecord::empty();
        rec.create(&pkt_at(5), 42);
        rec.update(&pkt_at(9), false);

        rec.reuse();
        assert_eq!(rec.hash(), 42);
        assert_eq!(rec.total_packets(), 0);
        assert_eq!(rec.time_first, Timeval::new(9, 0));
        assert_eq!(rec.src_tcp_flags, 0);
    }

    #[test]
    fn test_erase_clears_everything() {
        let mut rec = FlowRecord::empty();
        rec.create(&pkt_at(5), 42);
        rec.add_extension(Extension::Rtp(RtpData::default()));

        rec.erase();
        assert!(rec.is_empty());
        assert!(rec.extensions().is_empty());
    }

    #[test]
    fn test_one_extension_per_id() {
        let mut rec = FlowRecord::empty();
        rec.add_extension(Extension::BasicPlus(BasicPlusData::default()));
        rec.add_extension(Extension::Rtp(RtpData::default()));
        rec.add_extension(Extension::BasicPlus(BasicPlusData::default()));

        assert_eq!(rec.extensions().len(), 2);
        assert!(rec.extension(EXT_BASIC_PLUS).is_some());
        assert!(rec.extension(EXT_RTP).is_some());
    }

    #[test]
    fn test_remove_extension() {
        let mut rec = FlowRecord::empty();
        rec.add_extension(Extension::Rtp(RtpData::default()));
        rec.remove_extension(EXT_RTP);
        assert!(rec.extension(EXT_RTP).is_none());
    }
}
