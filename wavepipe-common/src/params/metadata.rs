//! Parameter metadata definitions
//!
//! Single source of truth for parameter names, defaults and validation.

use super::{GlobalParams, ParamMetadata};

impl GlobalParams {
    /// Get metadata for all tunable parameters
    ///
    /// Returns a static reference to the parameter metadata array. This is
    /// the single source of truth for:
    /// - Parameter names and types
    /// - Default values
    /// - Validation ranges
    /// - Validation logic
    ///
    /// # Example: Validating a Parameter
    ///
    /// ```rust
    /// # use wavepipe_common::params::GlobalParams;
    /// let metadata = GlobalParams::metadata();
    /// let rate_meta = metadata.iter()
    ///     .find(|m| m.key == "sample_rate")
    ///     .unwrap();
    ///
    /// assert!((rate_meta.validator)("16000").is_ok());
    /// assert!((rate_meta.validator)("100").is_err());
    /// ```
    pub fn metadata() -> &'static [ParamMetadata] {
        &[
            ParamMetadata {
                key: "sample_rate",
                data_type: "u32",
                default_value: "8000",
                description: "Sample rate for all streams on a device (Hz)",
                validation_range: "4000-192000",
                validator: |s| {
                    let v: u32 = s.parse()
                        .map_err(|_| "sample_rate: invalid number format".to_string())?;
                    if !(4000..=192000).contains(&v) {
                        return Err(format!("sample_rate: value {} out of range [4000, 192000]", v));
                    }
                    Ok(())
                },
            },

            ParamMetadata {
                key: "channel_count",
                data_type: "usize",
                default_value: "1",
                description: "Hardware channel count negotiated at device open",
                validation_range: "1-32",
                validator: |s| {
                    let v: usize = s.parse()
                        .map_err(|_| "channel_count: invalid number format".to_string())?;
                    if !(1..=32).contains(&v) {
                        return Err(format!("channel_count: value {} out of range [1, 32]", v));
                    }
                    Ok(())
                },
            },

            ParamMetadata {
                key: "block_size_hint",
                data_type: "usize",
                default_value: "160",
                description: "Preferred transfer block size (samples)",
                validation_range: "16-65536",
                validator: |s| {
                    let v: usize = s.parse()
                        .map_err(|_| "block_size_hint: invalid number format".to_string())?;
                    if !(16..=65536).contains(&v) {
                        return Err(format!("block_size_hint: value {} out of range [16, 65536]", v));
                    }
                    Ok(())
                },
            },

            ParamMetadata {
                key: "block_count_hint",
                data_type: "usize",
                default_value: "4",
                description: "Preferred number of hardware blocks queued in the transport",
                validation_range: "2-64",
                validator: |s| {
                    let v: usize = s.parse()
                        .map_err(|_| "block_count_hint: invalid number format".to_string())?;
                    if !(2..=64).contains(&v) {
                        return Err(format!("block_count_hint: value {} out of range [2, 64]", v));
                    }
                    Ok(())
                },
            },

            ParamMetadata {
                key: "underrun_zero_fill",
                data_type: "bool",
                default_value: "true",
                description: "Write silence when no channel has data (keeps hardware timing locked)",
                validation_range: "true|false",
                validator: |s| {
                    s.parse::<bool>()
                        .map(|_| ())
                        .map_err(|_| format!("underrun_zero_fill: value {:?} is not a boolean", s))
                },
            },

            ParamMetadata {
                key: "buffer_capacity",
                data_type: "usize",
                default_value: "16000",
                description: "Default channel buffer capacity (samples)",
                validation_range: "160-10000000",
                validator: |s| {
                    let v: usize = s.parse()
                        .map_err(|_| "buffer_capacity: invalid number format".to_string())?;
                    if !(160..=10_000_000).contains(&v) {
                        return Err(format!("buffer_capacity: value {} out of range [160, 10000000]", v));
                    }
                    Ok(())
                },
            },

            ParamMetadata {
                key: "device_retry_ms",
                data_type: "u64",
                default_value: "1000",
                description: "Device error recovery retry period (ms)",
                validation_range: "50-60000",
                validator: |s| {
                    let v: u64 = s.parse()
                        .map_err(|_| "device_retry_ms: invalid number format".to_string())?;
                    if !(50..=60000).contains(&v) {
                        return Err(format!("device_retry_ms: value {} out of range [50, 60000]", v));
                    }
                    Ok(())
                },
            },

            ParamMetadata {
                key: "settle_margin_ms",
                data_type: "u64",
                default_value: "20",
                description: "Extra margin added to flush settle-time estimates (ms)",
                validation_range: "0-1000",
                validator: |s| {
                    let v: u64 = s.parse()
                        .map_err(|_| "settle_margin_ms: invalid number format".to_string())?;
                    if v > 1000 {
                        return Err(format!("settle_margin_ms: value {} out of range [0, 1000]", v));
                    }
                    Ok(())
                },
            },
        ]
    }
}
