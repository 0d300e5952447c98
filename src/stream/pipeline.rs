// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use futures::stream::{BoxStream, StreamExt};
use std::time::Instant;

use crate::errors::EngineError;
use crate::observability::messages::stream::PipelineFinished;
use crate::observability::messages::StructuredLog;
use crate::stream::{SourceStage, TransformStage};
use crate::traits::StageSink;

/// A source, zero or more transform stages, and a sink.
///
/// Stages are lazy: nothing is pulled until [`Pipeline::run_into`] drives the
/// chain. The first error from any stage ends the run and dropping the chain
/// stops every upstream stage.
///
/// ```rust
/// use the_sluice::engine::stats::StatsRegistry;
/// use the_sluice::errors::BoxError;
/// use the_sluice::stream::{Collector, Pipeline, SourceStage, TransformOptions, TransformStage};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let stats = Arc::new(StatsRegistry::new());
/// let square = TransformStage::new(
///     |v: u64| async move { Ok::<_, BoxError>(v * v) },
///     TransformOptions::sequential(),
///     1,
///     stats,
/// );
/// let sink = Collector::new();
/// let delivered = Pipeline::from_source(SourceStage::from_iter(1..=3u64))
///     .through(square)
///     .run_into(&sink)
///     .await
///     .unwrap();
///
/// assert_eq!(delivered, 3);
/// assert_eq!(sink.results(), vec![1, 4, 9]);
/// # }
/// ```
pub struct Pipeline<T> {
    stream: BoxStream<'static, Result<T, EngineError>>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn from_source(source: SourceStage<T>) -> Self {
        Self {
            stream: source.boxed(),
        }
    }

    pub fn through<O: Send + 'static>(self, stage: TransformStage<T, O>) -> Pipeline<O> {
        Pipeline {
            stream: stage.apply(self.stream),
        }
    }

    /// Expose the composed chain as a plain stream.
    pub fn into_stream(self) -> BoxStream<'static, Result<T, EngineError>> {
        self.stream
    }

    /// Drive the chain into `sink` and return how many items it accepted.
    ///
    /// The sink is closed only when the chain completes without error.
    pub async fn run_into<S>(self, sink: &S) -> Result<u64, EngineError>
    where
        S: StageSink<T> + ?Sized,
    {
        let started = Instant::now();
        let mut stream = self.stream;
        let mut delivered = 0u64;

        let outcome = async {
            while let Some(item) = stream.next().await {
                let item = item?;
                sink.accept(item).await.map_err(|e| EngineError::Stage {
                    stage: "sink",
                    message: e.to_string(),
                })?;
                delivered += 1;
            }
            sink.close().await.map_err(|e| EngineError::Stage {
                stage: "sink",
                message: e.to_string(),
            })
        }
        .await;

        // Stop upstream work before reporting
        drop(stream);

        let message = outcome.as_ref().err().map(|e| e.to_string());
        PipelineFinished {
            items: delivered,
            error: message.as_deref(),
            duration: started.elapsed(),
        }
        .log();

        outcome.map(|_| delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stats::StatsRegistry;
    use crate::errors::BoxError;
    use crate::stream::{Collector, TransformOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn stage<F, Fut>(f: F, options: TransformOptions) -> TransformStage<u32, u32>
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<u32, BoxError>> + Send + 'static,
    {
        TransformStage::new(f, options, 4, Arc::new(StatsRegistry::new()))
    }

    #[tokio::test]
    async fn test_chains_stages_in_order() {
        let sink = Collector::new();
        let delivered = Pipeline::from_source(SourceStage::from_iter(0..5u32))
            .through(stage(|v| async move { Ok::<_, BoxError>(v + 1) }, TransformOptions::sequential()))
            .through(stage(|v| async move { Ok::<_, BoxError>(v * 100) }, TransformOptions::sequential()))
            .run_into(&sink)
            .await
            .unwrap();

        assert_eq!(delivered, 5);
        assert_eq!(sink.results(), vec![100, 200, 300, 400, 500]);
    }

    #[tokio::test]
    async fn test_first_error_stops_upstream() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let pulled_c = pulled.clone();
        let source = SourceStage::new(futures::stream::iter(0..1000u32).map(move |v| {
            pulled_c.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(v)
        }));

        let sink = Collector::new();
        let result = Pipeline::from_source(source)
            .through(stage(
                |v| async move {
                    if v == 3 {
                        Err::<u32, BoxError>("poisoned record".into())
                    } else {
                        Ok(v)
                    }
                },
                TransformOptions::sequential(),
            ))
            .run_into(&sink)
            .await;

        assert!(matches!(result, Err(EngineError::Stage { .. })));
        assert_eq!(sink.results(), vec![0, 1, 2]);
        assert_eq!(pulled.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_source_error_reaches_result() {
        let items: Vec<Result<u32, BoxError>> = vec![Ok(1), Err("socket closed".into())];
        let sink = Collector::new();
        let result = Pipeline::from_source(SourceStage::from_fallible_iter(items))
            .run_into(&sink)
            .await;

        match result {
            Err(EngineError::Source { source }) => assert_eq!(source.to_string(), "socket closed"),
            other => panic!("expected source error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(sink.results(), vec![1]);
    }

    struct ClosingSink {
        closed: AtomicBool,
        reject_after: usize,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl StageSink<u32> for ClosingSink {
        async fn accept(&self, _item: u32) -> Result<(), BoxError> {
            if self.seen.fetch_add(1, Ordering::SeqCst) >= self.reject_after {
                return Err("sink full".into());
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), BoxError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_closed_only_on_success() {
        let ok_sink = ClosingSink {
            closed: AtomicBool::new(false),
            reject_after: usize::MAX,
            seen: AtomicUsize::new(0),
        };
        Pipeline::from_source(SourceStage::from_iter(0..3u32))
            .run_into(&ok_sink)
            .await
            .unwrap();
        assert!(ok_sink.closed.load(Ordering::SeqCst));

        let full_sink = ClosingSink {
            closed: AtomicBool::new(false),
            reject_after: 1,
            seen: AtomicUsize::new(0),
        };
        let result = Pipeline::from_source(SourceStage::from_iter(0..3u32))
            .run_into(&full_sink)
            .await;
        assert!(matches!(result, Err(EngineError::Stage { stage: "sink", .. })));
        assert!(!full_sink.closed.load(Ordering::SeqCst));
    }
}
