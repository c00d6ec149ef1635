//! Configuration for the flow cache and the worker pipeline.
//!
//! All options are validated once, at construction time. A bad value aborts
//! startup with a [`ConfigError`]; nothing is re-checked on the per-packet
//! path.

use crate::error::ConfigError;

/// Default cache size exponent (2^17 = 131072 records total).
pub const DEFAULT_CACHE_SIZE_EXP: u32 = 17;
/// Default line size exponent (2^4 = 16 records per line).
pub const DEFAULT_LINE_SIZE_EXP: u32 = 4;
/// Default active timeout in seconds.
pub const DEFAULT_ACTIVE_TIMEOUT: u64 = 300;
/// Default inactive timeout in seconds.
pub const DEFAULT_INACTIVE_TIMEOUT: u64 = 30;
/// Default number of slots visited per timeout sweep.
pub const DEFAULT_TIMEOUT_STEP: u32 = 8;

/// Smallest accepted cache size exponent.
pub const MIN_CACHE_SIZE_EXP: u32 = 4;
/// Largest accepted cache size exponent.
pub const MAX_CACHE_SIZE_EXP: u32 = 30;

/// Flow cache options.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total slots = 2^cache_size_exp. Accepted range: 4..=30.
    pub cache_size_exp: u32,
    /// Line associativity = 2^line_size_exp. Must not exceed the cache size.
    pub line_size_exp: u32,
    /// Active timeout in seconds (flow duration).
    pub active_timeout: u64,
    /// Inactive timeout in seconds (idle gap).
    pub inactive_timeout: u64,
    /// Slots covered per packet by the expiry sweep.
    pub timeout_step: u32,
    /// When true, the two directions of a conversation are kept as
    /// separate flows (no inverse-tuple lookup).
    pub split_biflow: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size_exp: DEFAULT_CACHE_SIZE_EXP,
            line_size_exp: DEFAULT_LINE_SIZE_EXP,
            active_timeout: DEFAULT_ACTIVE_TIMEOUT,
            inactive_timeout: DEFAULT_INACTIVE_TIMEOUT,
            timeout_step: DEFAULT_TIMEOUT_STEP,
            split_biflow: false,
        }
    }
}

impl CacheConfig {
    /// Total number of slots.
    pub fn cache_size(&self) -> usize {
        1usize << self.cache_size_exp
    }

    /// Number of slots per line.
    pub fn line_size(&self) -> usize {
        1usize << self.line_size_exp
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size_exp < MIN_CACHE_SIZE_EXP || self.cache_size_exp > MAX_CACHE_SIZE_EXP {
            return Err(ConfigError::CacheSizeExponent {
                min: MIN_CACHE_SIZE_EXP,
                max: MAX_CACHE_SIZE_EXP,
                got: self.cache_size_exp,
            });
        }
        if self.line_size_exp > self.cache_size_exp {
            return Err(ConfigError::LineExceedsCache {
                line_size: self.line_size(),
                cache_size: self.cache_size(),
            });
        }
        if self.timeout_step == 0 {
            return Err(ConfigError::TimeoutStepZero);
        }
        Ok(())
    }
}

/// RTP classification options.
#[derive(Debug, Clone)]
pub struct RtpConfig {
    /// Number of packets after which the flow is classified.
    pub window: u32,
    /// Packets skipped at the start of the flow before counting.
    pub start: u32,
    /// Minimum verified-RTP fraction for a positive classification.
    pub threshold: f32,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            window: 200,
            start: 0,
            threshold: 0.3,
        }
    }
}

impl RtpConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::RtpThreshold(self.threshold));
        }
        Ok(())
    }
}

/// Worker pipeline options.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Flow cache options for the storage worker.
    pub cache: CacheConfig,
    /// Capacity of the input ring (packet blocks).
    pub input_ring: usize,
    /// Capacity of the export ring (completed flow records).
    pub export_ring: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            input_ring: 64,
            export_ring: 1024,
        }
    }
}

impl PipelineConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        if self.input_ring == 0 || self.export_ring == 0 {
            return Err(ConfigError::RingCapacityZero);
        }
        Ok(())
    }
}
