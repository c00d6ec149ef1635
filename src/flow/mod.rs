//! Flow data model: key, record, and plugin extensions.

pub mod ext;
pub mod key;
pub mod record;

pub use ext::{Extension, ExtensionId, EXT_BASIC_PLUS, EXT_QUIC, EXT_RTP, EXT_TLS};
pub use key::FlowKey;
pub use record::{EndReason, FlowRecord};
