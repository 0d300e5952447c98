// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Range checks for [`EngineConfig`].
//!
//! Every check runs in field order and the first failure is returned, so the
//! error always names a single field.
//!
//! ```rust
//! use the_sluice::config::{validate_config, EngineConfig};
//!
//! assert!(validate_config(&EngineConfig::default()).is_ok());
//! assert!(validate_config(&EngineConfig::default().with_max_concurrency(0)).is_err());
//! ```

use crate::config::EngineConfig;
use crate::errors::ConfigError;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Validate every range-constrained field of an engine configuration.
pub fn validate_config(cfg: &EngineConfig) -> Result<(), ConfigError> {
    if cfg.batch_size == 0 {
        return Err(invalid("batch_size", "must be greater than zero"));
    }
    if cfg.max_concurrency == 0 {
        return Err(invalid("max_concurrency", "must be greater than zero"));
    }
    if cfg.high_water_mark == 0 {
        return Err(invalid("high_water_mark", "must be greater than zero"));
    }
    // NaN fails both comparisons, so it is rejected here too
    if !(cfg.backpressure_threshold > 0.0 && cfg.backpressure_threshold <= 1.0) {
        return Err(invalid(
            "backpressure_threshold",
            format!("must be in (0, 1], got {}", cfg.backpressure_threshold),
        ));
    }
    if cfg.memory_limit == 0 {
        return Err(invalid("memory_limit", "must be greater than zero"));
    }
    if !(cfg.release_factor > 0.0 && cfg.release_factor < 1.0) {
        return Err(invalid(
            "release_factor",
            format!("must be in (0, 1), got {}", cfg.release_factor),
        ));
    }
    if cfg.backpressure_poll_interval_ms == 0 {
        return Err(invalid("backpressure_poll_interval_ms", "must be greater than zero"));
    }
    if cfg.sample_interval_ms == 0 {
        return Err(invalid("sample_interval_ms", "must be greater than zero"));
    }
    if cfg.sample_channel_capacity == 0 {
        return Err(invalid("sample_channel_capacity", "must be greater than zero"));
    }
    Ok(())
}
