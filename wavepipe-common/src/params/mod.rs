//! Global parameter management
//!
//! Centralized singleton for the tunables that govern device setup and
//! buffering. Read-frequently, write-rarely access pattern using RwLock.
//!
//! # Architecture
//!
//! All global parameters are stored in a single `GlobalParams` struct,
//! accessible via the `PARAMS` static singleton. This provides:
//! - Single source of truth for all configuration parameters
//! - Thread-safe access during pipeline assembly
//! - Low-contention read access (readers don't block each other)
//!
//! Parameters are *defaults applied at device-open time*, not per-call
//! switches: a device captures the values it needs when it opens, so
//! changing a parameter afterwards affects only devices opened later.
//!
//! # Usage
//!
//! ```rust
//! use wavepipe_common::params::PARAMS;
//!
//! // Read (fast, uncontended)
//! let rate = *PARAMS.sample_rate.read().unwrap();
//!
//! // Write (rare, initialization only)
//! PARAMS.set_sample_rate(16000).unwrap();
//! ```

use once_cell::sync::Lazy;
use std::sync::RwLock;

mod metadata;
mod setters;
mod init;

/// Global parameters singleton
///
/// Initialized once from config file / environment, read everywhere.
pub static PARAMS: Lazy<GlobalParams> = Lazy::new(GlobalParams::default);

/// Global parameter storage
///
/// All parameters stored with RwLock for thread-safe access.
pub struct GlobalParams {
    /// Sample rate for all streams on a device (Hz)
    ///
    /// Valid range: [4000, 192000]
    /// Default: 8000 Hz
    /// Captured by a device when it opens; governs settle-time estimates.
    pub sample_rate: RwLock<u32>,

    /// Hardware channel count negotiated at device open
    ///
    /// Valid range: [1, 32]
    /// Default: 1 (mono)
    pub channel_count: RwLock<usize>,

    /// Preferred transfer block size (samples per hardware block)
    ///
    /// Valid range: [16, 65536]
    /// Default: 160 samples (20 ms at 8 kHz)
    /// A transport may negotiate a different size; this is only the hint
    /// passed at open time.
    pub block_size_hint: RwLock<usize>,

    /// Preferred number of hardware blocks queued in the transport
    ///
    /// Valid range: [2, 64]
    /// Default: 4
    pub block_count_hint: RwLock<usize>,

    /// Underrun policy: write silence when no channel has data
    ///
    /// Default: true
    /// true keeps the hardware clock fed (timing stays locked); false
    /// stops driving output until data arrives.
    pub underrun_zero_fill: RwLock<bool>,

    /// Default channel buffer capacity (samples)
    ///
    /// Valid range: [160, 10000000]
    /// Default: 16000 samples (2 s at 8 kHz)
    pub buffer_capacity: RwLock<usize>,

    /// Device error recovery retry period (ms)
    ///
    /// Valid range: [50, 60000]
    /// Default: 1000 ms
    /// How often a broken device attempts close+reopen.
    pub device_retry_ms: RwLock<u64>,

    /// Extra margin added to flush settle-time estimates (ms)
    ///
    /// Valid range: [0, 1000]
    /// Default: 20 ms
    /// The hardware queue-depth query is coarse; the margin absorbs the
    /// granularity so flush-complete never fires early.
    pub settle_margin_ms: RwLock<u64>,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            sample_rate: RwLock::new(8000),
            channel_count: RwLock::new(1),
            block_size_hint: RwLock::new(160),
            block_count_hint: RwLock::new(4),
            underrun_zero_fill: RwLock::new(true),
            buffer_capacity: RwLock::new(16000),
            device_retry_ms: RwLock::new(1000),
            settle_margin_ms: RwLock::new(20),
        }
    }
}

/// Metadata for a single GlobalParams parameter
///
/// Encapsulates all metadata about a parameter including its validation
/// logic, eliminating duplication between config-file loading, environment
/// loading and the setter methods.
///
/// # Validator Closure Signature
///
/// All validators have signature `fn(&str) -> Result<(), String>` and
/// report errors as `"{param_name}: {specific_reason}"`.
///
/// # Example
///
/// ```rust
/// # use wavepipe_common::params::GlobalParams;
/// let meta = GlobalParams::metadata()
///     .iter()
///     .find(|m| m.key == "sample_rate")
///     .unwrap();
///
/// assert!((meta.validator)("8000").is_ok());
/// assert!((meta.validator)("1234567").is_err());
/// ```
pub struct ParamMetadata {
    pub key: &'static str,
    pub data_type: &'static str,
    pub default_value: &'static str,
    pub description: &'static str,
    pub validation_range: &'static str,
    pub validator: fn(&str) -> Result<(), String>,
}
