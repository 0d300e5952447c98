// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Periodic memory sampling.
//!
//! The sampler is a background tokio task that reads the configured
//! [`MemoryProbe`] on a fixed interval, records the resident figure into the
//! stats registry and broadcasts the full [`MemorySample`] to subscribers.
//! It runs whether or not a batch run is active, until [`MemorySampler::shutdown`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::stats::StatsRegistry;
use crate::observability::messages::memory::{SamplerStarted, SamplerStopped};
use crate::observability::messages::StructuredLog;
use crate::traits::{MemoryProbe, MemorySample};

/// Background memory sampler with a broadcast feed.
#[derive(Debug)]
pub struct MemorySampler {
    sender: Mutex<Option<broadcast::Sender<MemorySample>>>,
    cancel: CancellationToken,
}

impl MemorySampler {
    /// Spawn the sampling task. Must be called from within a Tokio runtime.
    pub fn start(
        probe: Arc<dyn MemoryProbe>,
        stats: Arc<StatsRegistry>,
        interval: Duration,
        capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let cancel = CancellationToken::new();

        let task_sender = sender.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            SamplerStarted { interval }.log();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; samples are spaced one interval apart
            ticker.tick().await;

            let mut samples_taken = 0u64;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = probe.sample();
                        stats.record_memory(sample.resident);
                        samples_taken += 1;
                        // No subscribers is not an error
                        let _ = task_sender.send(sample);
                    }
                }
            }
            SamplerStopped { samples_taken }.log();
        });

        Self {
            sender: Mutex::new(Some(sender)),
            cancel,
        }
    }

    /// Receive every sample broadcast from now on.
    ///
    /// After shutdown the returned receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<MemorySample> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|s| s.receiver_count()).unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop sampling and detach all subscribers. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take();
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingProbe {
        calls: AtomicU64,
    }

    impl MemoryProbe for CountingProbe {
        fn sample(&self) -> MemorySample {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            MemorySample {
                resident: n * 1000,
                virtual_size: n * 2000,
            }
        }
    }

    #[tokio::test]
    async fn test_samples_are_broadcast_and_recorded() {
        let stats = Arc::new(StatsRegistry::new());
        let probe = Arc::new(CountingProbe { calls: AtomicU64::new(0) });
        let sampler = MemorySampler::start(probe, stats.clone(), Duration::from_millis(10), 8);
        let mut rx = sampler.subscribe();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("sample within timeout")
            .unwrap();
        assert_eq!(first.virtual_size, first.resident * 2);
        assert!(stats.snapshot().memory_usage >= 1000);
        assert_eq!(sampler.subscriber_count(), 1);

        sampler.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscribers() {
        let stats = Arc::new(StatsRegistry::new());
        let probe = Arc::new(CountingProbe { calls: AtomicU64::new(0) });
        let sampler = MemorySampler::start(probe, stats, Duration::from_millis(10), 8);
        let mut rx = sampler.subscribe();

        sampler.shutdown();
        assert!(!sampler.is_running());
        assert_eq!(sampler.subscriber_count(), 0);

        // Drain anything sent before shutdown, then observe the close
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match rx.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        let mut late = sampler.subscribe();
        assert!(matches!(
            late.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
