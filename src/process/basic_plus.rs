//! basic_plus plugin: per-direction L3/L4 header details.
//!
//! Captures TTL, IP flags, TCP MSS, option mask, and window for both
//! directions, plus the size of the opening SYN packet. The reverse
//! direction is filled from the first packet seen in it.

use crate::flow::{Extension, ExtensionId, FlowRecord, EXT_BASIC_PLUS};
use crate::packet::Packet;
use crate::process::{PluginAction, ProcessPlugin};

/// Per-direction header fields; index 0 = source direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPlusData {
    pub ip_ttl: [u8; 2],
    pub ip_flags: [u8; 2],
    pub tcp_mss: [u32; 2],
    pub tcp_options: [u32; 2],
    pub tcp_window: [u16; 2],
    /// IP length of the pure-SYN packet that opened the flow, if any.
    pub tcp_syn_size: u16,
    dst_filled: bool,
}

/// Process plugin filling [`BasicPlusData`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPlusPlugin;

impl ProcessPlugin for BasicPlusPlugin {
    fn name(&self) -> &'static str {
        "basic_plus"
    }

    fn ext_id(&self) -> ExtensionId {
        EXT_BASIC_PLUS
    }

    fn post_create(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        let mut data = BasicPlusData {
            tcp_syn_size: if pkt.tcp_flags == 0x02 { pkt.ip_len } else { 0 },
            ..Default::default()
        };
        data.ip_ttl[0] = pkt.ip_ttl;
        data.ip_flags[0] = pkt.ip_flags;
        data.tcp_mss[0] = pkt.tcp_mss;
        data.tcp_options[0] = pkt.tcp_options;
        data.tcp_window[0] = pkt.tcp_window;

        flow.add_extension(Extension::BasicPlus(data));
        PluginAction::OK
    }

    fn pre_update(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        let Some(Extension::BasicPlus(data)) = flow.extension_mut(EXT_BASIC_PLUS) else {
            return PluginAction::OK;
        };

        let dir = usize::from(!pkt.source_pkt);
        if data.ip_ttl[dir] < pkt.ip_ttl {
            data.ip_ttl[dir] = pkt.ip_ttl;
        }
        if dir == 1 && !data.dst_filled {
            data.ip_ttl[1] = pkt.ip_ttl;
            data.ip_flags[1] = pkt.ip_flags;
            data.tcp_mss[1] = pkt.tcp_mss;
            data.tcp_options[1] = pkt.tcp_options;
            data.tcp_window[1] = pkt.tcp_window;
            data.dst_filled = true;
        }
        PluginAction::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(ttl: u8, window: u16, flags: u8, source: bool) -> Packet {
        Packet {
            ip_ttl: ttl,
            tcp_window: window,
            tcp_flags: flags,
            ip_len: 52,
            source_pkt: source,
            ..Default::default()
        }
    }

    fn data_of(flow: &FlowRecord) -> BasicPlusData {
        match flow.extension(EXT_BASIC_PLUS) {
            Some(Extension::BasicPlus(d)) => *d,
            _ => panic!("basic_plus extension missing"),
        }
    }

    #[test]
    fn test_post_create_fills_source_side() {
        let mut plugin = BasicPlusPlugin;
        let mut flow = FlowRecord::empty();
        let syn = pkt(64, 65535, 0x02, true);

        plugin.post_create(&mut flow, &syn);
        let data = data_of(&flow);
        assert_eq!(data.ip_ttl[0], 64);
        assert_eq!(data.tcp_window[0], 65535);
        assert_eq!(data.tcp_syn_size, 52);
        assert_eq!(data.ip_ttl[1], 0);
    }

    #[test]
    fn test_first_reverse_packet_fills_dst_side() {
        let mut plugin = BasicPlusPlugin;
        let mut flow = FlowRecord::empty();
        plugin.post_create(&mut flow, &pkt(64, 65535, 0x02, true));

        plugin.pre_update(&mut flow, &pkt(128, 29200, 0x12, false));
        let data = data_of(&flow);
        assert_eq!(data.ip_ttl[1], 128);
        assert_eq!(data.tcp_window[1], 29200);

        // Later reverse packets do not overwrite the snapshot.
        plugin.pre_update(&mut flow, &pkt(127, 100, 0x10, false));
        assert_eq!(data_of(&flow).tcp_window[1], 29200);
    }

    #[test]
    fn test_ttl_keeps_maximum() {
        let mut plugin = BasicPlusPlugin;
        let mut flow = FlowRecord::empty();
        plugin.post_create(&mut flow, &pkt(60, 0, 0, true));

        plugin.pre_update(&mut flow, &pkt(64, 0, 0, true));
        assert_eq!(data_of(&flow).ip_ttl[0], 64);

        plugin.pre_update(&mut flow, &pkt(50, 0, 0, true));
        assert_eq!(data_of(&flow).ip_ttl[0], 64);
    }

    #[test]
    fn test_non_syn_has_no_syn_size() {
        let mut plugin = BasicPlusPlugin;
        let mut flow = FlowRecord::empty();
        plugin.post_create(&mut flow, &pkt(64, 0, 0x12, true));
        assert_eq!(data_of(&flow).tcp_syn_size, 0);
    }
}
