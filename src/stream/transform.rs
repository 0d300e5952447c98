// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-item transform stage.
//!
//! Sequential mode finishes one item before pulling the next and stops at
//! the first failure. Parallel mode keeps up to `max_concurrency` items in
//! flight; a failing item does not disturb its siblings, intake stops, and
//! the error is emitted only after every in-flight item has settled.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use std::sync::Arc;

use crate::engine::stats::StatsRegistry;
use crate::errors::{BoxError, EngineError};
use crate::observability::messages::stream::StageItemFailed;
use crate::observability::messages::StructuredLog;
use crate::traits::ItemTransform;

/// How a [`TransformStage`] schedules and reports item work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    pub parallel: bool,
    pub swallow_errors: bool,
}

impl TransformOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    /// Count failed items but keep the stage running.
    pub fn swallow_errors(mut self, swallow: bool) -> Self {
        self.swallow_errors = swallow;
        self
    }
}

/// Applies an [`ItemTransform`] to every item of an upstream stage.
pub struct TransformStage<T, O> {
    transform: Arc<dyn ItemTransform<T, O>>,
    options: TransformOptions,
    max_concurrency: usize,
    stats: Arc<StatsRegistry>,
    name: &'static str,
}

impl<T, O> TransformStage<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    pub fn new<F>(
        transform: F,
        options: TransformOptions,
        max_concurrency: usize,
        stats: Arc<StatsRegistry>,
    ) -> Self
    where
        F: ItemTransform<T, O> + 'static,
    {
        Self {
            transform: Arc::new(transform),
            options,
            max_concurrency: max_concurrency.max(1),
            stats,
            name: "transform",
        }
    }

    /// Label used in logs and in [`EngineError::Stage`].
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn options(&self) -> TransformOptions {
        self.options
    }

    /// Attach this stage to an upstream stream of items.
    pub fn apply(
        self,
        input: BoxStream<'static, Result<T, EngineError>>,
    ) -> BoxStream<'static, Result<O, EngineError>> {
        if self.options.parallel {
            self.parallel(input)
        } else {
            self.sequential(input)
        }
    }

    /// Records a failed item; returns the error to emit unless it is swallowed.
    fn item_failed(
        stats: &StatsRegistry,
        name: &'static str,
        swallow: bool,
        error: BoxError,
    ) -> Option<EngineError> {
        stats.add_failed(1);
        let message = error.to_string();
        StageItemFailed {
            stage: name,
            swallowed: swallow,
            error: &message,
        }
        .log();
        if swallow {
            None
        } else {
            Some(EngineError::Stage {
                stage: name,
                message,
            })
        }
    }

    fn sequential(
        self,
        input: BoxStream<'static, Result<T, EngineError>>,
    ) -> BoxStream<'static, Result<O, EngineError>> {
        let state = SequentialState {
            input,
            stage: self,
            done: false,
        };

        stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            loop {
                match st.input.next().await {
                    None => return None,
                    Some(Err(upstream)) => {
                        st.done = true;
                        return Some((Err(upstream), st));
                    }
                    Some(Ok(item)) => {
                        let outcome = {
                            let _work = st.stage.stats.track();
                            st.stage.transform.apply(item).await
                        };
                        match outcome {
                            Ok(output) => {
                                st.stage.stats.add_processed(1);
                                return Some((Ok(output), st));
                            }
                            Err(error) => {
                                let stage = &st.stage;
                                if let Some(err) = Self::item_failed(
                                    &stage.stats,
                                    stage.name,
                                    stage.options.swallow_errors,
                                    error,
                                ) {
                                    st.done = true;
                                    return Some((Err(err), st));
                                }
                            }
                        }
                    }
                }
            }
        })
        .boxed()
    }

    fn parallel(
        self,
        input: BoxStream<'static, Result<T, EngineError>>,
    ) -> BoxStream<'static, Result<O, EngineError>> {
        let state = ParallelState {
            input,
            in_flight: FuturesUnordered::new(),
            input_done: false,
            pending_error: None,
            finished: false,
            stage: self,
        };

        stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            loop {
                let can_pull = !st.input_done && st.in_flight.len() < st.stage.max_concurrency;

                if !can_pull && st.in_flight.is_empty() {
                    // Drained: surface a held error, otherwise end
                    st.finished = true;
                    return st.pending_error.take().map(|err| (Err(err), st));
                }

                // Fill free slots before harvesting
                tokio::select! {
                    biased;
                    next = st.input.next(), if can_pull => match next {
                        Some(Ok(item)) => {
                            let transform = st.stage.transform.clone();
                            let work = st.stage.stats.track();
                            st.in_flight.push(Box::pin(async move {
                                let outcome = transform.apply(item).await;
                                drop(work);
                                outcome
                            }));
                        }
                        Some(Err(upstream)) => {
                            st.input_done = true;
                            st.pending_error.get_or_insert(upstream);
                        }
                        None => st.input_done = true,
                    },
                    Some(outcome) = st.in_flight.next(), if !st.in_flight.is_empty() => match outcome {
                        Ok(output) => {
                            st.stage.stats.add_processed(1);
                            return Some((Ok(output), st));
                        }
                        Err(error) => {
                            let stage = &st.stage;
                            if let Some(err) = Self::item_failed(
                                &stage.stats,
                                stage.name,
                                stage.options.swallow_errors,
                                error,
                            ) {
                                st.input_done = true;
                                st.pending_error.get_or_insert(err);
                            }
                        }
                    },
                }
            }
        })
        .boxed()
    }
}

struct SequentialState<T, O> {
    input: BoxStream<'static, Result<T, EngineError>>,
    stage: TransformStage<T, O>,
    done: bool,
}

struct ParallelState<T, O> {
    input: BoxStream<'static, Result<T, EngineError>>,
    in_flight: FuturesUnordered<BoxFuture<'static, Result<O, BoxError>>>,
    input_done: bool,
    pending_error: Option<EngineError>,
    finished: bool,
    stage: TransformStage<T, O>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SourceStage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn stats() -> Arc<StatsRegistry> {
        Arc::new(StatsRegistry::new())
    }

    fn source(n: u32) -> BoxStream<'static, Result<u32, EngineError>> {
        SourceStage::from_iter(0..n).boxed()
    }

    #[tokio::test]
    async fn test_sequential_maps_in_order() {
        let stats = stats();
        let stage = TransformStage::new(
            |v: u32| async move { Ok::<_, BoxError>(v * 10) },
            TransformOptions::sequential(),
            4,
            stats.clone(),
        );
        let out: Vec<u32> = stage.apply(source(5)).map(|r| r.unwrap()).collect().await;

        assert_eq!(out, vec![0, 10, 20, 30, 40]);
        assert_eq!(stats.snapshot().processed, 5);
        assert_eq!(stats.snapshot().in_progress, 0);
    }

    #[tokio::test]
    async fn test_sequential_error_aborts_stage() {
        let stats = stats();
        let stage = TransformStage::new(
            |v: u32| async move {
                if v == 2 {
                    Err::<u32, BoxError>("bad record".into())
                } else {
                    Ok(v)
                }
            },
            TransformOptions::sequential(),
            4,
            stats.clone(),
        )
        .with_name("validate");
        let out: Vec<_> = stage.apply(source(10)).collect().await;

        assert_eq!(out.len(), 3);
        match &out[2] {
            Err(EngineError::Stage { stage, message }) => {
                assert_eq!(*stage, "validate");
                assert_eq!(message, "bad record");
            }
            other => panic!("expected stage error, got {:?}", other.is_ok()),
        }
        let snap = stats.snapshot();
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.failed, 1);
    }

    #[tokio::test]
    async fn test_sequential_swallow_keeps_going() {
        let stats = stats();
        let stage = TransformStage::new(
            |v: u32| async move {
                if v % 2 == 0 {
                    Err::<u32, BoxError>("even".into())
                } else {
                    Ok(v)
                }
            },
            TransformOptions::sequential().swallow_errors(true),
            4,
            stats.clone(),
        );
        let out: Vec<u32> = stage.apply(source(6)).map(|r| r.unwrap()).collect().await;

        assert_eq!(out, vec![1, 3, 5]);
        assert_eq!(stats.snapshot().failed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_respects_bound_and_loses_nothing() {
        let stats = stats();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (live_c, peak_c) = (live.clone(), peak.clone());

        let stage = TransformStage::new(
            move |v: u32| {
                let live = live_c.clone();
                let peak = peak_c.clone();
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(((v * 7) % 5) as u64)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(v)
                }
            },
            TransformOptions::parallel(),
            3,
            stats.clone(),
        );
        let mut out: Vec<u32> = stage.apply(source(50)).map(|r| r.unwrap()).collect().await;
        out.sort_unstable();

        assert_eq!(out, (0..50).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(stats.snapshot().peak_in_flight <= 3);
        assert_eq!(stats.snapshot().in_progress, 0);
    }

    #[tokio::test]
    async fn test_parallel_error_waits_for_siblings() {
        let stats = stats();
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_c = finished.clone();

        let stage = TransformStage::new(
            move |v: u32| {
                let finished = finished_c.clone();
                async move {
                    if v == 0 {
                        return Err::<u32, BoxError>("first item broke".into());
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(v)
                }
            },
            TransformOptions::parallel(),
            3,
            stats.clone(),
        );
        let out: Vec<_> = stage.apply(source(10)).collect().await;

        // items 1 and 2 were already in flight with item 0; they still land
        let successes = out.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 2);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
        assert!(matches!(out.last(), Some(Err(EngineError::Stage { .. }))));
        assert_eq!(stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_parallel_swallow_completes_stage() {
        let stats = stats();
        let stage = TransformStage::new(
            |v: u32| async move {
                if v % 3 == 0 {
                    Err::<u32, BoxError>("skip".into())
                } else {
                    Ok(v)
                }
            },
            TransformOptions::parallel().swallow_errors(true),
            4,
            stats.clone(),
        );
        let out: Vec<_> = stage.apply(source(9)).collect().await;

        assert!(out.iter().all(|r| r.is_ok()));
        assert_eq!(out.len(), 6);
        assert_eq!(stats.snapshot().failed, 3);
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through() {
        for options in [TransformOptions::sequential(), TransformOptions::parallel()] {
            let items: Vec<Result<u32, BoxError>> = vec![Ok(1), Err("eof".into())];
            let stage = TransformStage::new(
                |v: u32| async move { Ok::<_, BoxError>(v) },
                options,
                2,
                stats(),
            );
            let out: Vec<_> = stage
                .apply(SourceStage::from_fallible_iter(items).boxed())
                .collect()
                .await;

            assert_eq!(out.len(), 2);
            assert!(matches!(out[1], Err(EngineError::Source { .. })));
        }
    }
}
