//! Error types for flowprobe.
//!
//! This module provides structured error types for all flowprobe operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`ConfigError`] - Errors from configuration validation
//! - [`RingError`] - Errors from the inter-worker rings
//!
//! All errors implement `std::error::Error`.

use thiserror::Error;

/// Main error type for flowprobe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, surfaced at construction
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ring handoff failure
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Error reported by the packet capture collaborator
    #[error("packet source error: {0}")]
    Source(String),

    /// Error reported by the flow encoder collaborator
    #[error("flow consumer error: {0}")]
    Consumer(String),
}

/// Errors from configuration validation.
///
/// Every variant aborts startup; none is recoverable at runtime.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// Cache size exponent outside the accepted range
    #[error("cache size exponent must be between {min} and {max}, got {got}")]
    CacheSizeExponent { min: u32, max: u32, got: u32 },

    /// Line size does not divide the cache size
    #[error("line size ({line_size}) must divide cache size ({cache_size})")]
    LineExceedsCache { line_size: usize, cache_size: usize },

    /// Timeout sweep would never advance
    #[error("timeout step must be at least 1")]
    TimeoutStepZero,

    /// Ring with no capacity cannot hand off records
    #[error("ring capacity must be at least 1")]
    RingCapacityZero,

    /// RTP detection threshold outside [0, 1]
    #[error("rtp detection threshold must be within 0.0..=1.0, got {0}")]
    RtpThreshold(f32),
}

/// Errors from the inter-worker rings.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RingError {
    /// The consumer side is gone; records can no longer be exported
    #[error("export ring closed by consumer")]
    Closed,

    /// The slot pool ran dry while the producer still holds the ring
    #[error("slot pool exhausted")]
    PoolExhausted,
}

/// Errors from QUIC Initial packet processing.
///
/// These never escape the QUIC plugin; a failed extraction leaves the flow
/// without a QUIC extension and processing continues.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuicError {
    /// Packet shorter than the field being read
    #[error("truncated at {context}")]
    Truncated { context: &'static str },

    /// Version field is zero (version negotiation)
    #[error("zero version")]
    ZeroVersion,

    /// Not a long-header Initial packet
    #[error("not an initial packet")]
    NotInitial,

    /// HKDF derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// AEAD tag mismatch on payload decryption
    #[error("authentication tag mismatch")]
    AuthenticationFailed,

    /// Unknown frame type encountered during CRYPTO reassembly
    #[error("unexpected frame type 0x{0:02x}")]
    UnexpectedFrame(u8),

    /// CRYPTO fragment falls outside the reassembly buffer
    #[error("crypto fragment out of bounds")]
    FragmentOutOfBounds,

    /// Reassembled buffer does not hold a parseable ClientHello
    #[error("malformed client hello")]
    MalformedClientHello,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
