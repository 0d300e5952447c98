// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Shared counters for one engine instance.
//!
//! Every field is an atomic so concurrently completing batches can update
//! counters without a read-modify-write race. Callers only ever see a
//! [`StatsSnapshot`], an owned copy that cannot reach back into the registry.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Live counters shared by the batch engine, the limiter, the backpressure
/// controller, the memory sampler and the stream stages.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    processed: AtomicU64,
    failed: AtomicU64,
    in_progress: AtomicUsize,
    peak_in_flight: AtomicUsize,
    memory_usage: AtomicU64,
    queue_size: AtomicUsize,
    backpressure_active: AtomicBool,
    backpressure_events: AtomicU64,
}

/// Point-in-time copy of [`StatsRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub in_progress: usize,
    pub peak_in_flight: usize,
    pub memory_usage: u64,
    pub queue_size: usize,
    pub backpressure_active: bool,
    pub backpressure_events: u64,
}

/// One unit of in-flight work; decrements `in_progress` on drop.
#[derive(Debug)]
pub struct WorkGuard {
    stats: Arc<StatsRegistry>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.stats.end_work();
    }
}

impl StatsSnapshot {
    /// Items that have left the engine, successfully or not.
    pub fn settled(&self) -> u64 {
        self.processed + self.failed
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the counters to zero and record a fresh memory reading.
    ///
    /// `in_progress` and `queue_size` are gauges of live slots and queued
    /// items, which release themselves on drop, so they are left as is.
    /// The peak restarts from the current `in_progress`.
    pub fn reset(&self, memory_usage: u64) {
        self.processed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.peak_in_flight
            .store(self.in_progress.load(Ordering::SeqCst), Ordering::SeqCst);
        self.backpressure_active.store(false, Ordering::SeqCst);
        self.backpressure_events.store(0, Ordering::SeqCst);
        self.memory_usage.store(memory_usage, Ordering::SeqCst);
    }

    pub fn add_processed(&self, count: u64) {
        self.processed.fetch_add(count, Ordering::SeqCst);
    }

    pub fn add_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::SeqCst);
    }

    /// Mark one more unit of work in flight and fold it into the peak.
    pub fn begin_work(&self) {
        let now = self.in_progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    /// Like [`begin_work`](Self::begin_work), ending the work when the guard drops.
    pub fn track(self: &Arc<Self>) -> WorkGuard {
        self.begin_work();
        WorkGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn end_work(&self) {
        // Saturate at zero so a stray release cannot wrap
        let _ = self
            .in_progress
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    pub fn record_memory(&self, bytes: u64) {
        self.memory_usage.store(bytes, Ordering::SeqCst);
    }

    pub fn queue_grew(&self) {
        self.queue_size.fetch_add(1, Ordering::SeqCst);
    }

    pub fn queue_shrank(&self) {
        let _ = self
            .queue_size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Flip the backpressure flag; returns true when this call changed it.
    pub fn set_backpressure(&self, active: bool) -> bool {
        let changed = self.backpressure_active.swap(active, Ordering::SeqCst) != active;
        if changed && active {
            self.backpressure_events.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }

    pub fn backpressure_active(&self) -> bool {
        self.backpressure_active.load(Ordering::SeqCst)
    }

    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            memory_usage: self.memory_usage.load(Ordering::SeqCst),
            queue_size: self.queue_size.load(Ordering::SeqCst),
            backpressure_active: self.backpressure_active.load(Ordering::SeqCst),
            backpressure_events: self.backpressure_events.load(Ordering::SeqCst),
        }
    }
}
