//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! management endpoint. All types derive Serde traits for deserialization
//! from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the management endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct MgmtConfig {
    /// Management server settings (port, timeouts, banner).
    pub server: ServerConfig,

    /// Input health classification thresholds.
    pub inputs: InputConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Management server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Loopback port to listen on (0 picks an ephemeral port).
    pub port: u16,

    /// Service name announced in the banner.
    pub service_name: String,

    /// Service version announced in the banner.
    pub service_version: String,

    /// Timeout for reading the command line, in seconds (0 = unbounded).
    pub read_timeout_secs: u64,

    /// Timeout for a `getptree` request to be fulfilled, in seconds (0 = unbounded).
    pub getptree_timeout_secs: u64,

    /// Maximum accepted length of one protocol line, excluding the `\n`.
    pub max_line_bytes: usize,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_secs)
    }

    pub fn getptree_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.getptree_timeout_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 12720,
            service_name: env!("CARGO_PKG_NAME").to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            read_timeout_secs: 30,
            getptree_timeout_secs: 30,
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Thresholds driving the input health state machine.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Quiet period after which the glitch counter is forgiven, in seconds.
    pub counter_reset_secs: u64,

    /// How long the buffer may stay empty before the input is NoData, in seconds.
    pub nodata_timeout_secs: u64,

    /// Glitch count at which the input is considered Unstable.
    pub unstable_threshold: u32,

    /// Number of consecutive quiet peak reports before the input is Silent.
    pub silence_count: u32,

    /// Peak level (dBFS) under which a peak report counts as quiet.
    pub silence_level_db: i32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            counter_reset_secs: 30 * 60,
            nodata_timeout_secs: 30,
            unstable_threshold: 3,
            silence_count: 100,
            silence_level_db: -50,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
