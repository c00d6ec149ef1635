//! Flow extension records.
//!
//! Each processing plugin owns one value type, tagged with a
//! globally-assigned id. The payloads live inline in the flow record (no
//! per-extension allocation); a flow holds at most one extension per id.

use crate::process::basic_plus::BasicPlusData;
use crate::process::quic::QuicData;
use crate::process::rtp::RtpData;
use crate::process::tls::TlsData;

/// Globally-assigned extension id.
pub type ExtensionId = u8;

/// Extension id of the basic_plus plugin.
pub const EXT_BASIC_PLUS: ExtensionId = 0;
/// Extension id of the QUIC plugin.
pub const EXT_QUIC: ExtensionId = 1;
/// Extension id of the RTP plugin.
pub const EXT_RTP: ExtensionId = 2;
/// Extension id of the TLS plugin.
pub const EXT_TLS: ExtensionId = 3;

/// Extension payload, one variant per known plugin kind.
#[derive(Debug, Clone)]
pub enum Extension {
    BasicPlus(BasicPlusData),
    Quic(QuicData),
    Rtp(RtpData),
    Tls(TlsData),
}

impl Extension {
    /// The id of the plugin owning this payload.
    pub fn id(&self) -> ExtensionId {
        match self {
            Extension::BasicPlus(_) => EXT_BASIC_PLUS,
            Extension::Quic(_) => EXT_QUIC,
            Extension::Rtp(_) => EXT_RTP,
            Extension::Tls(_) => EXT_TLS,
        }
    }
}
