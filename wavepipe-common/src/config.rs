//! Configuration file loading and resolution
//!
//! Resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `WAVEPIPE_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/wavepipe/config.toml`, then
//!    `/etc/wavepipe/config.toml` on Linux)
//!
//! The file is TOML with one optional key per tunable parameter:
//!
//! ```toml
//! sample_rate = 16000
//! channel_count = 2
//! block_size_hint = 320
//! underrun_zero_fill = false
//! ```
//!
//! Values are validated with the parameter metadata; an invalid value is
//! logged and skipped rather than aborting startup. Environment overrides
//! (`WAVEPIPE_*`) are applied after the file, so they win.

use crate::params::PARAMS;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tunable parameters as they appear in the config file
///
/// Every field is optional; absent fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub sample_rate: Option<u32>,
    pub channel_count: Option<usize>,
    pub block_size_hint: Option<usize>,
    pub block_count_hint: Option<usize>,
    pub underrun_zero_fill: Option<bool>,
    pub buffer_capacity: Option<usize>,
    pub device_retry_ms: Option<u64>,
    pub settle_margin_ms: Option<u64>,
}

impl FileConfig {
    /// Parse a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("config parse error: {}", e)))
    }

    /// Apply all present values to the global parameter singleton
    ///
    /// Each value is validated independently; invalid values warn and
    /// keep the previous setting.
    pub fn apply(&self) {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(v) = self.sample_rate {
            pairs.push(("sample_rate", v.to_string()));
        }
        if let Some(v) = self.channel_count {
            pairs.push(("channel_count", v.to_string()));
        }
        if let Some(v) = self.block_size_hint {
            pairs.push(("block_size_hint", v.to_string()));
        }
        if let Some(v) = self.block_count_hint {
            pairs.push(("block_count_hint", v.to_string()));
        }
        if let Some(v) = self.underrun_zero_fill {
            pairs.push(("underrun_zero_fill", v.to_string()));
        }
        if let Some(v) = self.buffer_capacity {
            pairs.push(("buffer_capacity", v.to_string()));
        }
        if let Some(v) = self.device_retry_ms {
            pairs.push(("device_retry_ms", v.to_string()));
        }
        if let Some(v) = self.settle_margin_ms {
            pairs.push(("settle_margin_ms", v.to_string()));
        }

        for (key, value) in pairs {
            if let Err(e) = PARAMS.apply_key_value(key, &value) {
                warn!("config: {}, keeping current value", e);
            }
        }
    }
}

/// Resolve the config file path following the priority order
///
/// Returns Ok(None) when no config file exists anywhere; only an
/// explicitly named file that is missing is an error.
pub fn resolve_config_file(cli_arg: Option<&Path>) -> Result<Option<PathBuf>> {
    // Priority 1: command-line argument
    if let Some(path) = cli_arg {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var("WAVEPIPE_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(Error::Config(format!(
            "WAVEPIPE_CONFIG points to missing file: {}",
            path.display()
        )));
    }

    // Priority 3: platform config directories
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("wavepipe").join("config.toml")) {
        if user_config.exists() {
            return Ok(Some(user_config));
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/wavepipe/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }
    }

    Ok(None)
}

/// Load the config file (if any) and apply it plus environment overrides
///
/// The single call binaries make during startup, before opening devices.
pub fn init(cli_arg: Option<&Path>) -> Result<()> {
    match resolve_config_file(cli_arg)? {
        Some(path) => {
            info!("loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            FileConfig::from_toml(&content)?.apply();
        }
        None => {
            info!("no config file found, using defaults");
        }
    }

    PARAMS.init_from_env();
    Ok(())
}
