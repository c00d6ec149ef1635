//! Parsed-packet input and the collaborator traits at the pipeline edges.
//!
//! The capture side lives outside this crate: an implementation of
//! [`PacketSource`] feeds already-parsed packets in. Likewise the wire
//! encoding of exported flows is external, behind [`FlowConsumer`]. The
//! types here are the contract between those collaborators and the cache.

use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;

use crate::error::Result;
use crate::flow::FlowRecord;

/// Capture timestamp with microsecond resolution.
///
/// Timeout arithmetic compares whole seconds only, so a flow idle for
/// 29.9 s with a 30 s inactive timeout is not yet expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timeval {
    pub secs: i64,
    pub usecs: u32,
}

impl Timeval {
    pub fn new(secs: i64, usecs: u32) -> Self {
        Self { secs, usecs }
    }
}

/// One parsed packet as delivered by the capture collaborator.
///
/// The payload is the application-layer data (after L4 headers). The
/// storage worker borrows the packet for the duration of one cache call.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Capture timestamp.
    pub ts: Timeval,

    /// L3 source address. The IP version is implied by the variant; a
    /// mixed v4/v6 pair never forms a valid flow key.
    pub src_ip: IpAddr,
    /// L3 destination address.
    pub dst_ip: IpAddr,

    /// L4 protocol number (6 = TCP, 17 = UDP).
    pub ip_proto: u8,
    /// L4 source port (zero for portless protocols).
    pub src_port: u16,
    /// L4 destination port.
    pub dst_port: u16,

    /// IP time-to-live / hop limit.
    pub ip_ttl: u8,
    /// IP header flags (v4) or zero.
    pub ip_flags: u8,
    /// Total IP length including headers; feeds the byte counters.
    pub ip_len: u16,

    /// TCP flag byte (FIN=0x01, SYN=0x02, RST=0x04, ...).
    pub tcp_flags: u8,
    /// TCP receive window.
    pub tcp_window: u16,
    /// TCP MSS option value, zero when absent.
    pub tcp_mss: u32,
    /// Bitmask of TCP option kinds seen in the header.
    pub tcp_options: u32,

    /// UDP datagram length, zero for non-UDP.
    pub udp_len: u16,

    /// Application-layer payload.
    pub payload: Bytes,

    /// True while the packet travels in the flow's source direction.
    /// Set by the cache during bi-flow matching, before plugin hooks run.
    pub source_pkt: bool,
}

impl Packet {
    /// IP version of the packet (4 or 6).
    pub fn ip_version(&self) -> u8 {
        match self.src_ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 6,
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            ts: Timeval::default(),
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ip_proto: 0,
            src_port: 0,
            dst_port: 0,
            ip_ttl: 0,
            ip_flags: 0,
            ip_len: 0,
            tcp_flags: 0,
            tcp_window: 0,
            tcp_mss: 0,
            tcp_options: 0,
            udp_len: 0,
            payload: Bytes::new(),
            source_pkt: true,
        }
    }
}

/// A batch of packets traveling the input ring together.
///
/// Batching amortizes the ring handoff; capture order is preserved within
/// and across blocks of one pipeline.
#[derive(Debug, Default)]
pub struct PacketBlock {
    pub packets: Vec<Packet>,
}

impl PacketBlock {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            packets: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// The capture collaborator: yields parsed packet blocks until exhausted.
///
/// Returning `Ok(None)` ends the stream and starts the shutdown drain.
pub trait PacketSource: Send {
    fn next_block(&mut self) -> Result<Option<PacketBlock>>;
}

/// The encoder collaborator: receives every completed flow exactly once,
/// in export order, on the output worker thread.
pub trait FlowConsumer: Send {
    fn consume(&mut self, flow: &FlowRecord) -> Result<()>;
}
