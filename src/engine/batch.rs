// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Batch engine: memory-aware, bounded-concurrency batch processing.
//!
//! [`BatchEngine::process_stream`] pulls items from a source one at a time,
//! groups them into batches of `batch_size`, and runs each batch through a
//! caller-supplied [`BatchTransform`] as a spawned task.
//!
//! # Dispatch gating
//!
//! Before a batch is spawned the driver
//! 1. waits for any active backpressure to release,
//! 2. acquires a concurrency slot from the [`ConcurrencyLimiter`],
//! 3. re-checks backpressure, since a batch finishing while the driver
//!    waited for its slot may have engaged it. If so the slot is returned
//!    and the driver goes back to step 1.
//!
//! The spawned task checks once more before calling the transform, holding
//! its slot while it waits, which closes the gap between step 3 and spawn.
//!
//! Each batch re-evaluates memory right after its transform returns and
//! before it gives back its slot, so a saturated engine never dispatches
//! past a fresh trigger.
//!
//! # Failure handling
//!
//! * With an `on_error` handler, a failed batch reports each of its items to
//!   the handler, counts them as failed, and the run continues.
//! * Without one, the first failure stops intake. Batches already in flight
//!   finish (they are never cancelled) and the error is returned.
//! * A source error ends intake the same way. Results gathered so far are
//!   discarded.
//!
//! # Run state
//!
//! Only one run may be active per engine. Each run claims a fresh run id
//! before anything else is touched, so a rejected call has no side effects.
//! Stats are reset at the start of a run and again when it exits, both while
//! the id is still the active one.
//!
//! [`BatchEngine::shutdown`] detaches the active run instead of waiting for
//! it. A detached run keeps draining its own batches, but it no longer counts
//! into the shared stats and its exit leaves alone whichever run holds the
//! engine by then.

use futures::stream::{self, Stream, StreamExt};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::config::{validate_config, EngineConfig};
use crate::engine::backpressure::BackpressureController;
use crate::engine::limiter::{ConcurrencyLimiter, Slot};
use crate::engine::memory::MemorySampler;
use crate::engine::stats::{StatsRegistry, StatsSnapshot};
use crate::errors::{BoxError, EngineError};
use crate::observability::messages::engine::{
    BatchDispatched, BatchFailed, RunCompleted, RunDetached, RunFailed, RunRejectedBusy, RunStarted,
};
use crate::observability::messages::StructuredLog;
use crate::stream::{Collector, Pipeline, SourceStage, TransformOptions, TransformStage};
use crate::traits::{BatchTransform, ItemTransform, MemoryProbe, MemorySample, ProcessMemoryProbe};

/// Called with a stats snapshot after every settled batch.
pub type ProgressHandler = Arc<dyn Fn(&StatsSnapshot) + Send + Sync>;

/// Called once per item of a failed batch, with the batch's error.
pub type ErrorHandler<T> = Arc<dyn Fn(&(dyn Error + 'static), &T) + Send + Sync>;

/// Per-run callbacks and result ordering for [`BatchEngine::process_stream`].
pub struct ProcessOptions<T> {
    on_progress: Option<ProgressHandler>,
    on_error: Option<ErrorHandler<T>>,
    preserve_order: bool,
}

impl<T> Default for ProcessOptions<T> {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_error: None,
            preserve_order: false,
        }
    }
}

impl<T> std::fmt::Debug for ProcessOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("preserve_order", &self.preserve_order)
            .finish()
    }
}

impl<T> ProcessOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, handler: impl Fn(&StatsSnapshot) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(handler));
        self
    }

    /// Registering a handler turns transform failures into per-item reports
    /// and keeps the run going.
    pub fn on_error(
        mut self,
        handler: impl Fn(&(dyn Error + 'static), &T) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Return results in batch submission order instead of completion order.
    pub fn preserve_order(mut self, preserve: bool) -> Self {
        self.preserve_order = preserve;
        self
    }
}

/// State shared between the driver and its batch tasks for one run.
struct RunShared<T, O, F> {
    transform: F,
    results: Mutex<Vec<(u64, Vec<O>)>>,
    progress_lock: Mutex<()>,
    on_progress: Option<ProgressHandler>,
    on_error: Option<ErrorHandler<T>>,
    stats: Arc<StatsRegistry>,
    backpressure: Arc<BackpressureController>,
    active_run: Arc<AtomicU64>,
    run_id: u64,
}

impl<T, O, F> RunShared<T, O, F> {
    /// False once a shutdown has detached this run from the engine.
    fn attached(&self) -> bool {
        self.active_run.load(Ordering::Acquire) == self.run_id
    }

    fn settle(&self, batch_index: u64, outputs: Option<Vec<O>>, batch_len: usize) {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let attached = self.attached();
        match outputs {
            Some(outputs) => {
                if attached {
                    self.stats.add_processed(batch_len as u64);
                }
                results.push((batch_index, outputs));
            }
            None if attached => self.stats.add_failed(batch_len as u64),
            None => {}
        }
    }

    fn report_progress(&self) {
        if let Some(handler) = &self.on_progress {
            // Serialized so a handler never observes snapshots out of order
            let _guard = self.progress_lock.lock().unwrap_or_else(PoisonError::into_inner);
            handler(&self.stats.snapshot());
        }
    }

    fn take_results(&self, preserve_order: bool) -> Vec<O> {
        let mut results = {
            let mut guard = self.results.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if preserve_order {
            results.sort_by_key(|(index, _)| *index);
        }
        results.into_iter().flat_map(|(_, outputs)| outputs).collect()
    }
}

/// Runs one batch while holding `slot`.
async fn run_batch<T, O, F>(
    shared: Arc<RunShared<T, O, F>>,
    slot: Slot,
    batch: Vec<T>,
    batch_index: u64,
) -> Result<(), EngineError>
where
    T: Clone + Send + 'static,
    O: Send + 'static,
    F: BatchTransform<T, O>,
{
    // Another batch may have engaged backpressure between the driver's
    // check and this task starting
    shared.backpressure.wait_for_release().await;

    let batch_len = batch.len();
    let retained = shared.on_error.as_ref().map(|_| batch.clone());

    let outcome = match shared.transform.transform(batch).await {
        Ok(outputs) => {
            shared.settle(batch_index, Some(outputs), batch_len);
            Ok(())
        }
        Err(error) => {
            let message = error.to_string();
            match (&shared.on_error, retained) {
                (Some(handler), Some(items)) => {
                    BatchFailed {
                        batch_index,
                        batch_len,
                        handled: true,
                        error: &message,
                    }
                    .log();
                    for item in &items {
                        handler(&*error, item);
                    }
                    shared.settle(batch_index, None, batch_len);
                    Ok(())
                }
                _ => {
                    BatchFailed {
                        batch_index,
                        batch_len,
                        handled: false,
                        error: &message,
                    }
                    .log();
                    shared.settle(batch_index, None, batch_len);
                    Err(EngineError::Transform {
                        batch_index,
                        source: error,
                    })
                }
            }
        }
    };

    shared.backpressure.evaluate();
    drop(slot);

    if outcome.is_ok() {
        shared.report_progress();
    }
    outcome
}

fn join_outcome(joined: Result<Result<(), EngineError>, JoinError>) -> Result<(), EngineError> {
    joined.unwrap_or_else(|e| {
        Err(EngineError::Internal {
            message: format!("Batch task did not complete: {}", e),
        })
    })
}

/// Collect finished batch tasks without waiting. Returns the first error.
fn reap_finished(tasks: &mut JoinSet<Result<(), EngineError>>) -> Option<EngineError> {
    let mut first = None;
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = join_outcome(joined) {
            first.get_or_insert(e);
        }
    }
    first
}

/// Clears run state when a run exits by any path, unless the run was
/// detached and the engine has moved on.
struct RunGuard<'a> {
    engine: &'a BatchEngine,
    run_id: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let _transition = self.engine.lock_transition();
        if self.engine.active_run.load(Ordering::Acquire) != self.run_id {
            RunDetached { run_id: self.run_id }.log();
            return;
        }
        self.engine.reset_stats();
        self.engine.active_run.store(IDLE, Ordering::Release);
    }
}

/// `active_run` value while no run holds the engine.
const IDLE: u64 = 0;

/// Memory-aware batch processor with bounded concurrency.
///
/// Construct inside a Tokio runtime: the memory sampler task starts
/// immediately and runs until [`BatchEngine::shutdown`] or drop.
pub struct BatchEngine {
    config: EngineConfig,
    stats: Arc<StatsRegistry>,
    limiter: ConcurrencyLimiter,
    backpressure: Arc<BackpressureController>,
    probe: Arc<dyn MemoryProbe>,
    sampler: MemorySampler,
    /// Id of the run holding the engine, or [`IDLE`]
    active_run: Arc<AtomicU64>,
    run_ids: AtomicU64,
    /// Serializes run start, run exit and shutdown
    transition: Mutex<()>,
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("config", &self.config)
            .field("is_processing", &self.is_processing())
            .field("stats", &self.stats())
            .finish()
    }
}

impl BatchEngine {
    /// Build an engine that samples this process's memory.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe::new()))
    }

    /// Build an engine that reads memory from `probe`.
    pub fn with_probe(config: EngineConfig, probe: Arc<dyn MemoryProbe>) -> Result<Self, EngineError> {
        validate_config(&config)?;

        let stats = Arc::new(StatsRegistry::new());
        stats.reset(probe.sample().resident);

        let limiter = ConcurrencyLimiter::new(config.max_concurrency, stats.clone());
        let backpressure = Arc::new(BackpressureController::new(&config, probe.clone(), stats.clone()));
        let sampler = MemorySampler::start(
            probe.clone(),
            stats.clone(),
            config.sample_interval(),
            config.sample_channel_capacity,
        );

        Ok(Self {
            config,
            stats,
            limiter,
            backpressure,
            probe,
            sampler,
            active_run: Arc::new(AtomicU64::new(IDLE)),
            run_ids: AtomicU64::new(IDLE),
            transition: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Owned copy of the current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_processing(&self) -> bool {
        self.active_run.load(Ordering::Acquire) != IDLE
    }

    /// Receive periodic memory samples. Closed once the engine shuts down.
    pub fn subscribe_memory(&self) -> broadcast::Receiver<MemorySample> {
        self.sampler.subscribe()
    }

    /// Stop the memory sampler, detach subscribers, and release the engine.
    ///
    /// In-flight transforms are not cancelled. A run still active is
    /// detached: it finishes on its own but no longer owns the engine.
    pub fn shutdown(&self) {
        self.sampler.shutdown();
        let _transition = self.lock_transition();
        self.active_run.store(IDLE, Ordering::Release);
    }

    fn reset_stats(&self) {
        self.stats.reset(self.probe.sample().resident);
    }

    fn lock_transition(&self) -> std::sync::MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the engine for a new run, resetting stats. `None` when busy.
    fn begin_run(&self) -> Option<RunGuard<'_>> {
        let _transition = self.lock_transition();
        if self.active_run.load(Ordering::Acquire) != IDLE {
            return None;
        }
        let run_id = self.run_ids.fetch_add(1, Ordering::Relaxed) + 1;
        self.active_run.store(run_id, Ordering::Release);
        self.reset_stats();
        Some(RunGuard { engine: self, run_id })
    }

    /// Process every item of `source` in batches through `transform`.
    ///
    /// Returns one output per successfully processed item, in batch
    /// completion order unless [`ProcessOptions::preserve_order`] is set.
    /// Fails immediately with [`EngineError::Busy`] if a run is active.
    pub async fn process_stream<T, O, S, F>(
        &self,
        source: S,
        transform: F,
        options: ProcessOptions<T>,
    ) -> Result<Vec<O>, EngineError>
    where
        T: Clone + Send + 'static,
        O: Send + 'static,
        S: Stream<Item = Result<T, BoxError>>,
        F: BatchTransform<T, O> + 'static,
    {
        let Some(run) = self.begin_run() else {
            RunRejectedBusy.log();
            return Err(EngineError::Busy);
        };

        let started = Instant::now();
        let batch_size = self.config.batch_size;
        RunStarted {
            batch_size,
            max_concurrency: self.limiter.max_concurrency(),
        }
        .log();

        let shared = Arc::new(RunShared {
            transform,
            results: Mutex::new(Vec::new()),
            progress_lock: Mutex::new(()),
            on_progress: options.on_progress,
            on_error: options.on_error,
            stats: self.stats.clone(),
            backpressure: self.backpressure.clone(),
            active_run: self.active_run.clone(),
            run_id: run.run_id,
        });

        let mut tasks = JoinSet::new();
        let mut batch = Vec::with_capacity(batch_size);
        let mut next_index = 0u64;
        let mut failure: Option<EngineError> = None;

        tokio::pin!(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(item) => batch.push(item),
                Err(error) => {
                    failure = Some(EngineError::Source { source: error });
                    break;
                }
            }

            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                if let Err(e) = self.dispatch(&shared, &mut tasks, full, next_index).await {
                    failure = Some(e);
                    break;
                }
                next_index += 1;
            }

            if let Some(e) = reap_finished(&mut tasks) {
                failure = Some(e);
                break;
            }
        }

        // Final partial batch
        if failure.is_none() && !batch.is_empty() {
            match self.dispatch(&shared, &mut tasks, batch, next_index).await {
                Ok(()) => next_index += 1,
                Err(e) => failure = Some(e),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = join_outcome(joined) {
                failure.get_or_insert(e);
            }
        }

        let duration = started.elapsed();
        if let Some(error) = failure {
            RunFailed {
                kind: error.kind(),
                error: &error,
                duration,
            }
            .log();
            return Err(error);
        }

        let snapshot = self.stats.snapshot();
        RunCompleted {
            batches: next_index,
            processed: snapshot.processed,
            failed: snapshot.failed,
            duration,
        }
        .log();

        Ok(shared.take_results(options.preserve_order))
    }

    /// [`BatchEngine::process_stream`] over an infallible iterator.
    pub async fn process_iter<T, O, I, F>(
        &self,
        items: I,
        transform: F,
        options: ProcessOptions<T>,
    ) -> Result<Vec<O>, EngineError>
    where
        T: Clone + Send + 'static,
        O: Send + 'static,
        I: IntoIterator<Item = T>,
        F: BatchTransform<T, O> + 'static,
    {
        let source = stream::iter(items.into_iter().map(Ok::<T, BoxError>));
        self.process_stream(source, transform, options).await
    }

    async fn dispatch<T, O, F>(
        &self,
        shared: &Arc<RunShared<T, O, F>>,
        tasks: &mut JoinSet<Result<(), EngineError>>,
        batch: Vec<T>,
        batch_index: u64,
    ) -> Result<(), EngineError>
    where
        T: Clone + Send + 'static,
        O: Send + 'static,
        F: BatchTransform<T, O> + 'static,
    {
        let slot = loop {
            self.backpressure.wait_for_release().await;
            let slot = self.limiter.acquire().await?;
            if !self.backpressure.is_active() {
                break slot;
            }
            drop(slot);
        };

        let dispatched = BatchDispatched {
            batch_index,
            batch_len: batch.len(),
            in_flight: self.limiter.active(),
        };
        dispatched.log();
        let span = dispatched.span();

        tasks.spawn(run_batch(shared.clone(), slot, batch, batch_index).instrument(span));
        Ok(())
    }

    /// Adapt a fallible async producer into a source stage.
    pub fn create_readable_stream<T, S>(&self, source: S) -> SourceStage<T>
    where
        T: Send + 'static,
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
    {
        SourceStage::new(source)
    }

    /// Source stage that prefetches up to `high_water_mark` items, reporting
    /// occupancy in `queue_size`.
    pub fn create_buffered_readable_stream<T, S>(&self, source: S) -> SourceStage<T>
    where
        T: Send + 'static,
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
    {
        SourceStage::new(source).with_lookahead(self.config.high_water_mark, self.stats.clone())
    }

    /// Per-item transform stage sharing this engine's stats and concurrency cap.
    pub fn create_transform_stream<T, O, F>(&self, transform: F, options: TransformOptions) -> TransformStage<T, O>
    where
        T: Send + 'static,
        O: Send + 'static,
        F: ItemTransform<T, O> + 'static,
    {
        TransformStage::new(transform, options, self.config.max_concurrency, self.stats.clone())
    }

    pub fn create_collector_stream<T>(&self) -> Collector<T> {
        Collector::new()
    }

    pub fn create_pipeline<T: Send + 'static>(&self, source: SourceStage<T>) -> Pipeline<T> {
        Pipeline::from_source(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backpressure::test_support::ScriptedProbe;
    use std::time::Duration;

    fn engine(config: EngineConfig) -> BatchEngine {
        BatchEngine::with_probe(config, Arc::new(ScriptedProbe::new([], 1_000))).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let result = BatchEngine::new(EngineConfig::default().with_batch_size(0));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_source_yields_nothing() {
        let engine = engine(EngineConfig::default());
        let out: Vec<u32> = engine
            .process_iter(
                Vec::<u32>::new(),
                |b: Vec<u32>| async move { Ok::<_, BoxError>(b) },
                ProcessOptions::new(),
            )
            .await
            .unwrap();

        assert!(out.is_empty());
        assert!(!engine.is_processing());
    }

    #[tokio::test]
    async fn test_transform_may_shrink_batches() {
        let engine = engine(EngineConfig::default().with_batch_size(4));
        let out = engine
            .process_iter(
                0..10u32,
                |b: Vec<u32>| async move { Ok::<_, BoxError>(vec![b.iter().sum::<u32>()]) },
                ProcessOptions::new().preserve_order(true),
            )
            .await
            .unwrap();

        assert_eq!(out, vec![6, 22, 17]);
    }

    #[tokio::test]
    async fn test_preserve_order_sorts_by_batch() {
        let engine = engine(EngineConfig::default().with_batch_size(1).with_max_concurrency(4));
        // earlier batches sleep longer, so completion order is reversed
        let out = engine
            .process_iter(
                0..4u64,
                |b: Vec<u64>| async move {
                    tokio::time::sleep(Duration::from_millis(40 - b[0] * 10)).await;
                    Ok::<_, BoxError>(b)
                },
                ProcessOptions::new().preserve_order(true),
            )
            .await
            .unwrap();

        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_memory_feed() {
        let engine = engine(EngineConfig::default());
        let mut feed = engine.subscribe_memory();
        engine.shutdown();

        assert!(matches!(
            feed.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(!engine.is_processing());
    }

    #[tokio::test]
    async fn test_batch_waits_out_backpressure_before_transform() {
        let config = EngineConfig::default()
            .with_memory_limit(1000)
            .with_backpressure_threshold(0.8)
            .with_backpressure_poll_interval(Duration::from_millis(1));
        let stats = Arc::new(StatsRegistry::new());
        let probe = Arc::new(ScriptedProbe::new([700, 500], 100));
        let backpressure = Arc::new(BackpressureController::new(&config, probe.clone(), stats.clone()));
        let limiter = ConcurrencyLimiter::new(1, stats.clone());

        // engaged after the driver's last check, before the task starts
        let slot = limiter.acquire().await.unwrap();
        stats.set_backpressure(true);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_c = seen.clone();
        let probe_c = probe.clone();
        let shared = Arc::new(RunShared {
            transform: move |batch: Vec<u64>| {
                seen_c.store(probe_c.last(), Ordering::SeqCst);
                async move { Ok::<_, BoxError>(batch) }
            },
            results: Mutex::new(Vec::new()),
            progress_lock: Mutex::new(()),
            on_progress: None,
            on_error: None::<ErrorHandler<u64>>,
            stats: stats.clone(),
            backpressure,
            active_run: Arc::new(AtomicU64::new(1)),
            run_id: 1,
        });

        run_batch(shared.clone(), slot, vec![7u64], 0).await.unwrap();

        // 0.7 stays inside the band, 0.5 releases, then the transform runs
        assert_eq!(seen.load(Ordering::SeqCst), 500);
        assert_eq!(probe.reclaims.load(Ordering::SeqCst), 2);
        assert!(!stats.backpressure_active());
        assert_eq!(stats.snapshot().processed, 1);
        assert_eq!(shared.take_results(false), vec![7]);
    }

    #[tokio::test]
    async fn test_detached_batches_do_not_count() {
        let stats = Arc::new(StatsRegistry::new());
        let probe = Arc::new(ScriptedProbe::new([], 100));
        let config = EngineConfig::default();
        let shared = Arc::new(RunShared {
            transform: |batch: Vec<u64>| async move { Ok::<_, BoxError>(batch) },
            results: Mutex::new(Vec::new()),
            progress_lock: Mutex::new(()),
            on_progress: None,
            on_error: None::<ErrorHandler<u64>>,
            stats: stats.clone(),
            backpressure: Arc::new(BackpressureController::new(&config, probe, stats.clone())),
            active_run: Arc::new(AtomicU64::new(IDLE)),
            run_id: 3,
        });

        shared.settle(0, Some(vec![1, 2]), 2);
        shared.settle(1, None, 4);

        assert_eq!(stats.snapshot().settled(), 0);
        assert_eq!(shared.take_results(true), vec![1, 2]);
    }

    #[test]
    fn test_options_debug_hides_closures() {
        let options = ProcessOptions::<u8>::new().on_progress(|_| {}).preserve_order(true);
        let rendered = format!("{:?}", options);
        assert!(rendered.contains("on_progress: true"));
        assert!(rendered.contains("on_error: false"));
    }
}
