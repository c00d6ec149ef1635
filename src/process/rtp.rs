//! RTP classifier plugin.
//!
//! Validates candidate UDP payloads against RTP header invariants and
//! confirms a flow as RTP by cross-packet consistency: constant SSRC,
//! near-monotonic sequence numbers, and bounded timestamp progression,
//! tracked per direction by a small state machine. A threshold over the
//! verified/total packet ratio yields the final classification.

use crate::config::RtpConfig;
use crate::flow::{Extension, ExtensionId, FlowRecord, EXT_RTP};
use crate::packet::Packet;
use crate::process::{PluginAction, ProcessPlugin};

const UDP_PROTO: u8 = 17;
const DNS_PORT: u16 = 53;

/// Reserved RTCP payload-type range; candidates inside it are rejected.
const RTCP_PT_RANGE: std::ops::RangeInclusive<u8> = 72..=95;

/// Maximum sequence-number distance between consecutive packets of one
/// stream.
const SEQ_MAX_DIFF: u16 = 5;
/// Maximum timestamp distance between consecutive packets of one stream.
const TS_MAX_DIFF: u32 = 10 * 1024;

/// Fixed RTP header fields, byte-swapped from network order on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Read the fixed header from a UDP payload. The caller has already
    /// checked the 12-byte minimum.
    fn read(payload: &[u8]) -> Self {
        Self {
            payload_type: payload[1] & 0x7f,
            sequence: u16::from_be_bytes([payload[2], payload[3]]),
            timestamp: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            ssrc: u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
        }
    }

    /// Whether `next` plausibly continues the stream this header belongs
    /// to: same SSRC and payload type, sequence and timestamp close by.
    fn matches(&self, next: &RtpHeader) -> bool {
        self.ssrc == next.ssrc
            && self.payload_type == next.payload_type
            && self.sequence.abs_diff(next.sequence) < SEQ_MAX_DIFF
            && self.timestamp.abs_diff(next.timestamp) < TS_MAX_DIFF
    }
}

/// Per-direction classifier state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RtpState {
    /// No candidate seen yet.
    #[default]
    Empty,
    /// One candidate header stored, waiting for confirmation.
    Matching,
    /// Stream confirmed; verified packets are being counted.
    Initialized,
}

/// One direction of the state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpDirection {
    pub state: RtpState,
    pub header: RtpHeader,
    /// Verified RTP packets in this direction.
    pub rtp: u32,
    /// All packets observed in this direction.
    pub total: u32,
}

impl RtpDirection {
    fn advance(&mut self, header: Option<RtpHeader>) {
        self.total += 1;

        let Some(header) = header else {
            // Invalid candidate: counted in the totals, no transition.
            return;
        };

        match self.state {
            RtpState::Empty => {
                self.header = header;
                self.state = RtpState::Matching;
            }
            RtpState::Matching => {
                if self.header.matches(&header) {
                    self.state = RtpState::Initialized;
                    self.rtp += 1;
                }
                self.header = header;
            }
            RtpState::Initialized => {
                if self.header.matches(&header) {
                    self.rtp += 1;
                    self.header = header;
                }
            }
        }
    }
}

/// RTP flow extension: both direction machines plus the classification.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpData {
    pub src: RtpDirection,
    pub dst: RtpDirection,
    /// Threshold verdict, set once enough packets were seen.
    pub classified: Option<bool>,
}

impl RtpData {
    /// Verified RTP packets over both directions.
    pub fn rtp_packets(&self) -> u32 {
        self.src.rtp + self.dst.rtp
    }

    /// All observed packets over both directions.
    pub fn total_packets(&self) -> u32 {
        self.src.total + self.dst.total
    }
}

/// Process plugin driving the RTP state machines.
#[derive(Debug, Clone, Default)]
pub struct RtpPlugin {
    cfg: RtpConfig,
}

impl RtpPlugin {
    pub fn new(cfg: RtpConfig) -> Self {
        Self { cfg }
    }

    /// Parse and validate one candidate packet.
    fn validate(flow: &FlowRecord, pkt: &Packet) -> Option<RtpHeader> {
        if flow.ip_proto != UDP_PROTO
            || pkt.payload.len() < 12
            || pkt.src_port == DNS_PORT
            || pkt.dst_port == DNS_PORT
        {
            return None;
        }
        if pkt.payload[0] >> 6 != 2 {
            return None;
        }
        let header = RtpHeader::read(&pkt.payload);
        if RTCP_PT_RANGE.contains(&header.payload_type) {
            return None;
        }
        Some(header)
    }

    fn manage(&self, flow: &mut FlowRecord, pkt: &Packet) {
        if flow.ip_proto != UDP_PROTO {
            return;
        }

        let header = Self::validate(flow, pkt);
        let source = pkt.source_pkt;
        let window = self.cfg.window;

        let Some(Extension::Rtp(data)) = flow.extension_mut(EXT_RTP) else {
            return;
        };

        if source {
            data.src.advance(header);
        } else {
            data.dst.advance(header);
        }

        if data.classified.is_none() && data.total_packets() >= window {
            data.classified = Some(Self::verdict(data, &self.cfg));
        }
    }

    fn verdict(data: &RtpData, cfg: &RtpConfig) -> bool {
        let counted = data.total_packets().saturating_sub(cfg.start);
        counted > 0 && data.rtp_packets() as f32 / counted as f32 >= cfg.threshold
    }
}

impl ProcessPlugin for RtpPlugin {
    fn name(&self) -> &'static str {
        "rtp"
    }

    fn ext_id(&self) -> ExtensionId {
        EXT_RTP
    }

    fn post_create(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        if flow.ip_proto == UDP_PROTO {
            flow.add_extension(Extension::Rtp(RtpData::default()));
            self.manage(flow, pkt);
        }
        PluginAction::OK
    }

    fn post_update(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        self.manage(flow, pkt);
        PluginAction::OK
    }

    fn pre_export(&mut self, flow: &mut FlowRecord) {
        if let Some(Extension::Rtp(data)) = flow.extension_mut(EXT_RTP) {
            if data.classified.is_none() {
                data.classified = Some(Self::verdict(data, &self.cfg));
            }
        }
    }
}
