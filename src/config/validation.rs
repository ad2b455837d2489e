//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, levels in dBFS range)
//! - Check the metrics address parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MgmtConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::MgmtConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.max_line_bytes must be at least 2, got {0}")]
    LineLimitTooSmall(usize),

    #[error("server.service_name must not be empty")]
    EmptyServiceName,

    #[error("inputs.nodata_timeout_secs must be greater than 0")]
    ZeroNoDataTimeout,

    #[error("inputs.unstable_threshold must be greater than 0")]
    ZeroUnstableThreshold,

    #[error("inputs.silence_level_db must be between -90 and 0, got {0}")]
    SilenceLevelOutOfRange(i32),

    #[error("observability.log_level '{0}' is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &MgmtConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.max_line_bytes < 2 {
        errors.push(ValidationError::LineLimitTooSmall(config.server.max_line_bytes));
    }
    if config.server.service_name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }

    if config.inputs.nodata_timeout_secs == 0 {
        errors.push(ValidationError::ZeroNoDataTimeout);
    }
    if config.inputs.unstable_threshold == 0 {
        errors.push(ValidationError::ZeroUnstableThreshold);
    }
    if !(-90..=0).contains(&config.inputs.silence_level_db) {
        errors.push(ValidationError::SilenceLevelOutOfRange(
            config.inputs.silence_level_db,
        ));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
