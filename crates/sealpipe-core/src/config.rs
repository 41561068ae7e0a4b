use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SealpipeError, SealpipeResult};

/// Top-level configuration (loaded from sealpipe.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealpipeConfig {
    pub log: LogConfig,
    pub transfer: TransferConfig,
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Directory the receiver writes finished files into (default: public)
    pub output_dir: PathBuf,
    /// Connection-level deadline for one whole transfer, 0 disables it
    pub io_timeout_secs: u64,
}

/// Backpressure and fragmentation settings for the data-channel adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest message handed to the underlying channel (default: 32 KiB)
    pub fragment_size: usize,
    /// Buffered amount at which the transport signals "low" (default: 1 MiB)
    pub low_water_mark: u64,
    /// Writers block while the buffered amount exceeds this (default: 4 MiB)
    pub high_water_mark: u64,
    /// Re-check interval while blocked on backpressure (default: 50 ms)
    pub poll_interval_ms: u64,
}

impl SealpipeConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> SealpipeResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SealpipeError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SealpipeError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would deadlock or spin the data-channel adapter.
    pub fn validate(&self) -> SealpipeResult<()> {
        let ch = &self.channel;
        if ch.fragment_size == 0 {
            return Err(SealpipeError::Config("channel.fragment_size must be > 0".into()));
        }
        if ch.low_water_mark > ch.high_water_mark {
            return Err(SealpipeError::Config(format!(
                "channel.low_water_mark ({}) exceeds channel.high_water_mark ({})",
                ch.low_water_mark, ch.high_water_mark
            )));
        }
        if ch.poll_interval_ms == 0 {
            return Err(SealpipeError::Config("channel.poll_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

impl TransferConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs))
    }
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("public"),
            io_timeout_secs: 300,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            fragment_size: 32 * 1024,
            low_water_mark: 1 << 20,
            high_water_mark: 4 << 20,
            poll_interval_ms: 50,
        }
    }
}
