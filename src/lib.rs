//! # flowprobe
//!
//! Flow exporter core: a bounded, line-associative flow cache with a
//! protocol-aware enrichment pipeline.
//!
//! Packets parsed by an external capture collaborator are aggregated
//! into bidirectional flow records indexed by the five-tuple. Process
//! plugins enrich each record at well-defined packet lifecycle hooks
//! and can force flows out of the cache at protocol boundaries.
//! Completed records are handed to an external encoder through a
//! preallocated export ring.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowprobe::config::PipelineConfig;
//! use flowprobe::pipeline::run_pipeline;
//! use flowprobe::process::{BasicPlusPlugin, PluginPipeline, QuicPlugin, RtpPlugin, TlsPlugin};
//! # struct MySource;
//! # impl flowprobe::packet::PacketSource for MySource {
//! #     fn next_block(&mut self) -> flowprobe::Result<Option<flowprobe::packet::PacketBlock>> { Ok(None) }
//! # }
//! # struct MyEncoder;
//! # impl flowprobe::packet::FlowConsumer for MyEncoder {
//! #     fn consume(&mut self, _f: &flowprobe::flow::FlowRecord) -> flowprobe::Result<()> { Ok(()) }
//! # }
//!
//! let mut plugins = PluginPipeline::new();
//! plugins.register(BasicPlusPlugin);
//! plugins.register(TlsPlugin::new());
//! plugins.register(QuicPlugin::new());
//! plugins.register(RtpPlugin::default());
//!
//! let report = run_pipeline(
//!     &PipelineConfig::default(),
//!     MySource,       // feeds parsed packets in
//!     plugins,
//!     MyEncoder,      // receives completed flows
//! ).unwrap();
//! assert!(report.is_ok());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                         flowprobe                            |
//! +--------------------------------------------------------------+
//! |  packet/    - parsed-packet input, collaborator traits       |
//! |  flow/      - flow key, record, plugin extensions            |
//! |  cache/     - line-associative store, export ring, cache     |
//! |  process/   - plugin pipeline, basic_plus, TLS, QUIC, RTP    |
//! |  pipeline/  - input/storage/output workers                   |
//! |  config/    - validated options                              |
//! |  error/     - error types                                    |
//! +--------------------------------------------------------------+
//! ```
//!
//! Data flow: input worker -> packet ring -> storage worker (flow
//! cache) -> export ring -> output worker. The storage worker is
//! strictly single-threaded; all concurrency is between workers via
//! bounded rings.

pub mod cache;
pub mod config;
pub mod error;
pub mod flow;
pub mod packet;
pub mod pipeline;
pub mod process;

// Re-export commonly used types at crate root for convenience
pub use cache::{export_ring, CacheStats, ExportRing, ExportSink, FlowCache, FlowStore};
pub use config::{CacheConfig, PipelineConfig, RtpConfig};
pub use error::{ConfigError, Error, QuicError, Result, RingError};
pub use flow::{EndReason, Extension, ExtensionId, FlowKey, FlowRecord};
pub use packet::{FlowConsumer, Packet, PacketBlock, PacketSource, Timeval};
pub use pipeline::{run_pipeline, PipelineReport};
pub use process::{PluginAction, PluginPipeline, ProcessPlugin};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
