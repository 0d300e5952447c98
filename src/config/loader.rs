// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::{
    DEFAULT_BACKPRESSURE_POLL_INTERVAL_MS, DEFAULT_BACKPRESSURE_THRESHOLD, DEFAULT_BATCH_SIZE,
    DEFAULT_HIGH_WATER_MARK, DEFAULT_MAX_CONCURRENCY, DEFAULT_MEMORY_LIMIT,
    DEFAULT_RELEASE_FACTOR, DEFAULT_SAMPLE_CHANNEL_CAPACITY, DEFAULT_SAMPLE_INTERVAL_MS,
};
use crate::config::validation::validate_config;
use crate::errors::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Configuration for one engine instance.
///
/// Immutable once the engine is built. Every field is optional in the file
/// form and falls back to the defaults in [`crate::config::consts`].
///
/// # Example
/// ```yaml
/// batch_size: 500
/// max_concurrency: 4
/// backpressure_threshold: 0.75
/// memory_limit: 268435456
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub high_water_mark: usize,
    pub backpressure_threshold: f64,
    pub memory_limit: u64,
    pub release_factor: f64,
    pub backpressure_poll_interval_ms: u64,
    pub sample_interval_ms: u64,
    pub sample_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            release_factor: DEFAULT_RELEASE_FACTOR,
            backpressure_poll_interval_ms: DEFAULT_BACKPRESSURE_POLL_INTERVAL_MS,
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            sample_channel_capacity: DEFAULT_SAMPLE_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    pub fn with_backpressure_threshold(mut self, threshold: f64) -> Self {
        self.backpressure_threshold = threshold;
        self
    }

    pub fn with_memory_limit(mut self, memory_limit: u64) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    pub fn with_release_factor(mut self, factor: f64) -> Self {
        self.release_factor = factor;
        self
    }

    /// Rounded down to whole milliseconds, never below 1ms.
    pub fn with_backpressure_poll_interval(mut self, interval: Duration) -> Self {
        self.backpressure_poll_interval_ms = whole_millis(interval);
        self
    }

    /// Rounded down to whole milliseconds, never below 1ms.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_ms = whole_millis(interval);
        self
    }

    pub fn backpressure_poll_interval(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Usage ratio at or below which a suspended intake resumes.
    pub fn release_ratio(&self) -> f64 {
        self.backpressure_threshold * self.release_factor
    }
}

/// Load an engine configuration from a YAML or TOML file.
///
/// The format is picked from the extension: `.toml` is parsed as TOML,
/// anything else as YAML.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    if is_toml {
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: display,
            reason: e.to_string(),
        })
    } else {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: display,
            reason: e.to_string(),
        })
    }
}

/// Load a configuration file and reject out-of-range values.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let cfg = load_config(path)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn whole_millis(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1)
}
