//! Parameter initialization from config file and environment
//!
//! Metadata-based loading: each parameter is validated with its metadata
//! validator before being applied, and falls back to its default (with a
//! warning) when the supplied value is missing or invalid. Parameters are
//! processed independently; one bad value never aborts the rest.

use super::GlobalParams;
use tracing::{debug, warn};

/// Environment variable prefix for parameter overrides
/// (e.g. `WAVEPIPE_SAMPLE_RATE=16000`)
const ENV_PREFIX: &str = "WAVEPIPE_";

impl GlobalParams {
    /// Reset all parameters to defaults (for testing only)
    #[cfg(test)]
    pub(super) fn reset_to_defaults(&self) {
        *self.sample_rate.write().unwrap() = 8000;
        *self.channel_count.write().unwrap() = 1;
        *self.block_size_hint.write().unwrap() = 160;
        *self.block_count_hint.write().unwrap() = 4;
        *self.underrun_zero_fill.write().unwrap() = true;
        *self.buffer_capacity.write().unwrap() = 16000;
        *self.device_retry_ms.write().unwrap() = 1000;
        *self.settle_margin_ms.write().unwrap() = 20;
    }

    /// Validate and apply a single `key = value` pair
    ///
    /// Dispatch point shared by the config-file loader and the environment
    /// loader. Unknown keys are reported as errors so typos in config
    /// files do not pass silently.
    pub fn apply_key_value(&self, key: &str, value: &str) -> Result<(), String> {
        let meta = Self::metadata()
            .iter()
            .find(|m| m.key == key)
            .ok_or_else(|| format!("unknown parameter: {}", key))?;

        (meta.validator)(value)?;

        // Validated above; the parses below cannot fail.
        match key {
            "sample_rate" => *self.sample_rate.write().unwrap() = value.parse().unwrap(),
            "channel_count" => *self.channel_count.write().unwrap() = value.parse().unwrap(),
            "block_size_hint" => *self.block_size_hint.write().unwrap() = value.parse().unwrap(),
            "block_count_hint" => *self.block_count_hint.write().unwrap() = value.parse().unwrap(),
            "underrun_zero_fill" => {
                *self.underrun_zero_fill.write().unwrap() = value.parse().unwrap()
            }
            "buffer_capacity" => *self.buffer_capacity.write().unwrap() = value.parse().unwrap(),
            "device_retry_ms" => *self.device_retry_ms.write().unwrap() = value.parse().unwrap(),
            "settle_margin_ms" => *self.settle_margin_ms.write().unwrap() = value.parse().unwrap(),
            _ => unreachable!("metadata/apply dispatch out of sync for {}", key),
        }

        debug!("parameter {} = {}", key, value);
        Ok(())
    }

    /// Apply `WAVEPIPE_*` environment variable overrides
    ///
    /// Checked after the config file so the environment wins. Invalid
    /// values are logged and skipped, keeping the previous value.
    pub fn init_from_env(&self) {
        for meta in Self::metadata() {
            let var = format!("{}{}", ENV_PREFIX, meta.key.to_uppercase());
            match std::env::var(&var) {
                Ok(value) => {
                    if let Err(e) = self.apply_key_value(meta.key, &value) {
                        warn!("{}: {}, keeping current value", var, e);
                    }
                }
                Err(std::env::VarError::NotPresent) => {}
                Err(e) => warn!("{}: {}, keeping current value", var, e),
            }
        }
    }
}
