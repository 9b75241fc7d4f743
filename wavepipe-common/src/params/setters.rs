//! Parameter setter methods with metadata-based validation
//!
//! All setters delegate range checking to the metadata validators so the
//! config-file loader, the environment loader and direct callers agree on
//! what is acceptable.
//!
//! # RwLock Unwrap Justification
//!
//! All setters use `.write().unwrap()` on RwLock-protected fields. RwLock
//! poisoning only occurs if a thread panics while holding the lock, which
//! indicates corrupted process state; panicking here is the correct
//! fail-fast behavior.

use super::GlobalParams;

impl GlobalParams {
    fn validate(key: &'static str, value: &str) -> Result<(), String> {
        let meta = Self::metadata()
            .iter()
            .find(|m| m.key == key)
            .unwrap_or_else(|| panic!("{} metadata must exist", key));
        (meta.validator)(value)
    }

    /// Validate and update sample_rate
    pub fn set_sample_rate(&self, value: u32) -> Result<(), String> {
        Self::validate("sample_rate", &value.to_string())?;
        *self.sample_rate.write().unwrap() = value;
        Ok(())
    }

    /// Validate and update channel_count
    pub fn set_channel_count(&self, value: usize) -> Result<(), String> {
        Self::validate("channel_count", &value.to_string())?;
        *self.channel_count.write().unwrap() = value;
        Ok(())
    }

    /// Validate and update block_size_hint
    pub fn set_block_size_hint(&self, value: usize) -> Result<(), String> {
        Self::validate("block_size_hint", &value.to_string())?;
        *self.block_size_hint.write().unwrap() = value;
        Ok(())
    }

    /// Validate and update block_count_hint
    pub fn set_block_count_hint(&self, value: usize) -> Result<(), String> {
        Self::validate("block_count_hint", &value.to_string())?;
        *self.block_count_hint.write().unwrap() = value;
        Ok(())
    }

    /// Update underrun_zero_fill
    pub fn set_underrun_zero_fill(&self, value: bool) {
        *self.underrun_zero_fill.write().unwrap() = value;
    }

    /// Validate and update buffer_capacity
    pub fn set_buffer_capacity(&self, value: usize) -> Result<(), String> {
        Self::validate("buffer_capacity", &value.to_string())?;
        *self.buffer_capacity.write().unwrap() = value;
        Ok(())
    }

    /// Validate and update device_retry_ms
    pub fn set_device_retry_ms(&self, value: u64) -> Result<(), String> {
        Self::validate("device_retry_ms", &value.to_string())?;
        *self.device_retry_ms.write().unwrap() = value;
        Ok(())
    }

    /// Validate and update settle_margin_ms
    pub fn set_settle_margin_ms(&self, value: u64) -> Result<(), String> {
        Self::validate("settle_margin_ms", &value.to_string())?;
        *self.settle_margin_ms.write().unwrap() = value;
        Ok(())
    }
}
