// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Memory-driven intake control with a hysteresis band.
//!
//! Backpressure engages when `usage / memory_limit` rises above the
//! threshold, and only releases once the ratio falls to `threshold *
//! release_factor` or below. While engaged, the waiter asks the probe for a
//! best-effort reclaim and re-samples on a fixed poll interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::engine::stats::StatsRegistry;
use crate::observability::messages::memory::{BackpressureEngaged, BackpressureReleased};
use crate::observability::messages::StructuredLog;
use crate::traits::MemoryProbe;

// Absorbs rounding in `threshold * release_factor` (0.8 * 0.7 != 0.56 in f64)
const RATIO_EPSILON: f64 = 1e-9;

/// Decides when intake must pause and waits for memory to recover.
pub struct BackpressureController {
    probe: Arc<dyn MemoryProbe>,
    stats: Arc<StatsRegistry>,
    memory_limit: u64,
    threshold: f64,
    release_ratio: f64,
    poll_interval: Duration,
}

impl std::fmt::Debug for BackpressureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureController")
            .field("memory_limit", &self.memory_limit)
            .field("threshold", &self.threshold)
            .field("release_ratio", &self.release_ratio)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl BackpressureController {
    pub fn new(cfg: &EngineConfig, probe: Arc<dyn MemoryProbe>, stats: Arc<StatsRegistry>) -> Self {
        Self {
            probe,
            stats,
            memory_limit: cfg.memory_limit,
            threshold: cfg.backpressure_threshold,
            release_ratio: cfg.release_ratio(),
            poll_interval: cfg.backpressure_poll_interval(),
        }
    }

    /// Take a reading, record it, and return the usage ratio.
    pub fn sample_ratio(&self) -> f64 {
        let sample = self.probe.sample();
        self.stats.record_memory(sample.resident);
        sample.ratio(self.memory_limit)
    }

    /// Re-evaluate after a unit of work completes.
    ///
    /// Engages backpressure when the ratio is above the threshold; never
    /// releases it. Returns whether backpressure is active afterwards.
    pub fn evaluate(&self) -> bool {
        let ratio = self.sample_ratio();
        if ratio > self.threshold {
            if self.stats.set_backpressure(true) {
                BackpressureEngaged {
                    usage: (ratio * self.memory_limit as f64) as u64,
                    limit: self.memory_limit,
                    ratio,
                    threshold: self.threshold,
                }
                .log();
            }
            return true;
        }
        self.stats.backpressure_active()
    }

    pub fn is_active(&self) -> bool {
        self.stats.backpressure_active()
    }

    /// Suspend until backpressure is released. Returns at once when inactive.
    ///
    /// Several tasks may wait at once; whichever sees the release first
    /// clears the flag and logs it, the others just return.
    pub async fn wait_for_release(&self) {
        if !self.stats.backpressure_active() {
            return;
        }

        let started = Instant::now();
        loop {
            self.probe.reclaim();
            tokio::time::sleep(self.poll_interval).await;
            if !self.stats.backpressure_active() {
                return;
            }

            let ratio = self.sample_ratio();
            if ratio <= self.release_ratio + RATIO_EPSILON {
                if !self.stats.set_backpressure(false) {
                    return;
                }
                BackpressureReleased {
                    ratio,
                    release_ratio: self.release_ratio,
                    waited: started.elapsed(),
                }
                .log();
                return;
            }
        }
    }
}
