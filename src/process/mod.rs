//! Processing-plugin pipeline.
//!
//! A process plugin enriches flows with protocol-specific metadata. The
//! cache invokes every registered plugin, in registration order, at five
//! packet lifecycle hooks; hook return codes are OR-composed and any
//! flush bit triggers the cache's flush protocol.
//!
//! Plugins must not block, must not call back into the store, and must
//! not touch state shared with other workers. Scratch state lives inside
//! the plugin value itself; per-flow state lives in the flow's extension.

pub mod basic_plus;
pub mod quic;
pub mod rtp;
pub mod tls;

use std::ops::{BitOr, BitOrAssign};

use crate::flow::{ExtensionId, FlowRecord};
use crate::packet::Packet;

pub use basic_plus::BasicPlusPlugin;
pub use quic::QuicPlugin;
pub use rtp::RtpPlugin;
pub use tls::TlsPlugin;

/// Return code of a plugin hook. Codes compose by bitwise OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginAction(u8);

impl PluginAction {
    /// Nothing requested.
    pub const OK: Self = Self(0);
    /// From `pre_create` only: drop the packet before key derivation.
    pub const DISCARD: Self = Self(0b0000_0001);
    /// Export the current flow with reason Forced.
    pub const FLUSH: Self = Self(0b0000_0010);
    /// Export, then re-seed the slot with the same key and re-run
    /// `post_create`. Implies FLUSH.
    pub const FLUSH_WITH_REINSERT: Self = Self(0b0000_0110);
    /// Export, then re-enter the whole per-packet procedure. Implies
    /// FLUSH.
    pub const TERMINATE_FLOW: Self = Self(0b0000_1010);
    /// Plugin-declared failure: the extension is dropped and the flow is
    /// exported with reason NoResource.
    pub const ERROR: Self = Self(0b0001_0000);

    /// True when every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any flush bit is set.
    pub fn wants_flush(self) -> bool {
        self.contains(Self::FLUSH)
    }
}

impl BitOr for PluginAction {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PluginAction {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A processing plugin.
///
/// Every hook has a no-op default so plugins implement only the
/// lifecycle points they care about.
pub trait ProcessPlugin: Send {
    /// Plugin name for diagnostics.
    fn name(&self) -> &'static str;

    /// The extension id this plugin attaches under.
    fn ext_id(&self) -> ExtensionId;

    /// Before the packet is matched against the cache.
    fn pre_create(&mut self, _pkt: &Packet) -> PluginAction {
        PluginAction::OK
    }

    /// After a flow was created from this packet.
    fn post_create(&mut self, _flow: &mut FlowRecord, _pkt: &Packet) -> PluginAction {
        PluginAction::OK
    }

    /// Before this packet is folded into an existing flow.
    fn pre_update(&mut self, _flow: &mut FlowRecord, _pkt: &Packet) -> PluginAction {
        PluginAction::OK
    }

    /// After this packet was folded into the flow.
    fn post_update(&mut self, _flow: &mut FlowRecord, _pkt: &Packet) -> PluginAction {
        PluginAction::OK
    }

    /// Immediately before the flow enters the export ring. Invoked
    /// exactly once per flow.
    fn pre_export(&mut self, _flow: &mut FlowRecord) {}
}

/// Ordered plugin pipeline, instantiated once per storage worker.
///
/// Built explicitly at pipeline construction; there is no global
/// registration.
#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<Box<dyn ProcessPlugin>>,
}

impl PluginPipeline {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Append a plugin; hooks run in registration order.
    pub fn register<P: ProcessPlugin + 'static>(&mut self, plugin: P) {
        self.plugins.push(Box::new(plugin));
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn pre_create(&mut self, pkt: &Packet) -> PluginAction {
        let mut action = PluginAction::OK;
        for p in &mut self.plugins {
            action |= p.pre_create(pkt);
        }
        action
    }

    pub fn post_create(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        let mut action = PluginAction::OK;
        for p in &mut self.plugins {
            let ret = p.post_create(flow, pkt);
            if ret.contains(PluginAction::ERROR) {
                flow.remove_extension(p.ext_id());
            }
            action |= ret;
        }
        action
    }

    pub fn pre_update(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        let mut action = PluginAction::OK;
        for p in &mut self.plugins {
            let ret = p.pre_update(flow, pkt);
            if ret.contains(PluginAction::ERROR) {
                flow.remove_extension(p.ext_id());
            }
            action |= ret;
        }
        action
    }

    pub fn post_update(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        let mut action = PluginAction::OK;
        for p in &mut self.plugins {
            let ret = p.post_update(flow, pkt);
            if ret.contains(PluginAction::ERROR) {
                flow.remove_extension(p.ext_id());
            }
            action |= ret;
        }
        action
    }

    pub fn pre_export(&mut self, flow: &mut FlowRecord) {
        for p in &mut self.plugins {
            p.pre_export(flow);
        }
    }
}
