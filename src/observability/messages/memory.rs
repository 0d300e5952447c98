// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for memory sampling and backpressure transitions.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// Intake suspended because memory crossed the trigger ratio.
///
/// # Log Level
/// `warn!` - Degraded throughput until release
///
/// # Example
/// ```
/// use the_sluice::observability::messages::memory::BackpressureEngaged;
///
/// let msg = BackpressureEngaged {
///     usage: 450_000_000,
///     limit: 536_870_912,
///     ratio: 0.84,
///     threshold: 0.8,
/// };
///
/// tracing::warn!("{}", msg);
/// ```
pub struct BackpressureEngaged {
    pub usage: u64,
    pub limit: u64,
    pub ratio: f64,
    pub threshold: f64,
}

impl Display for BackpressureEngaged {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Backpressure engaged: memory {} / {} bytes (ratio {:.3} > threshold {:.3})",
            self.usage, self.limit, self.ratio, self.threshold
        )
    }
}

impl StructuredLog for BackpressureEngaged {
    fn log(&self) {
        tracing::warn!(
            usage = self.usage,
            limit = self.limit,
            ratio = self.ratio,
            threshold = self.threshold,
            "{}", self
        );
    }
}

/// Intake resumed after memory fell under the release ratio.
///
/// # Log Level
/// `info!` - Recovery event
pub struct BackpressureReleased {
    pub ratio: f64,
    pub release_ratio: f64,
    pub waited: std::time::Duration,
}

impl Display for BackpressureReleased {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Backpressure released after {:?}: ratio {:.3} <= {:.3}",
            self.waited, self.ratio, self.release_ratio
        )
    }
}

impl StructuredLog for BackpressureReleased {
    fn log(&self) {
        tracing::info!(
            ratio = self.ratio,
            release_ratio = self.release_ratio,
            waited_ms = self.waited.as_millis() as u64,
            "{}", self
        );
    }
}

/// Background sampler started.
///
/// # Log Level
/// `debug!`
pub struct SamplerStarted {
    pub interval: std::time::Duration,
}

impl Display for SamplerStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Memory sampler started, interval {:?}", self.interval)
    }
}

impl StructuredLog for SamplerStarted {
    fn log(&self) {
        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "{}", self);
    }
}

/// Background sampler stopped.
///
/// # Log Level
/// `debug!`
pub struct SamplerStopped {
    pub samples_taken: u64,
}

impl Display for SamplerStopped {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Memory sampler stopped after {} samples", self.samples_taken)
    }
}

impl StructuredLog for SamplerStopped {
    fn log(&self) {
        tracing::debug!(samples_taken = self.samples_taken, "{}", self);
    }
}
