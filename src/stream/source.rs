// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::engine::stats::StatsRegistry;
use crate::errors::{BoxError, EngineError};

/// Pull-driven source stage.
///
/// Each poll advances the wrapped producer by one item. A producer error is
/// emitted once as [`EngineError::Source`] and ends the stage.
pub struct SourceStage<T> {
    inner: BoxStream<'static, Result<T, EngineError>>,
    finished: bool,
}

impl<T: Send + 'static> SourceStage<T> {
    /// Wrap a fallible async producer.
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
    {
        Self {
            inner: source
                .map(|item| item.map_err(|source| EngineError::Source { source }))
                .boxed(),
            finished: false,
        }
    }

    /// Wrap an infallible iterator.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(items.into_iter().map(Ok)))
    }

    /// Wrap an iterator whose items may fail.
    pub fn from_fallible_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<T, BoxError>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(items))
    }

    /// Prefetch up to `capacity` items ahead of the consumer.
    ///
    /// A spawned producer task fills a bounded channel; channel occupancy is
    /// reported as `queue_size`. Dropping the stage drops whatever is still
    /// queued, which gives its count back, and stops the producer even while
    /// it waits on upstream. Must be called from within a Tokio runtime.
    pub fn with_lookahead(self, capacity: usize, stats: Arc<StatsRegistry>) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut upstream = self;

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => break,
                    next = upstream.next() => next,
                };
                let Some(item) = next else { break };
                let is_err = item.is_err();
                if tx.send(Queued::new(item, stats.clone())).await.is_err() || is_err {
                    break;
                }
            }
        });

        let buffered = stream::unfold(rx, |mut rx| async move {
            let queued = rx.recv().await?;
            queued.into_inner().map(|item| (item, rx))
        });

        Self {
            inner: buffered.boxed(),
            finished: false,
        }
    }
}

/// An item counted in `queue_size` for as long as it is buffered.
struct Queued<T> {
    item: Option<Result<T, EngineError>>,
    stats: Arc<StatsRegistry>,
}

impl<T> Queued<T> {
    fn new(item: Result<T, EngineError>, stats: Arc<StatsRegistry>) -> Self {
        stats.queue_grew();
        Self { item: Some(item), stats }
    }

    fn into_inner(mut self) -> Option<Result<T, EngineError>> {
        self.item.take()
    }
}

impl<T> Drop for Queued<T> {
    fn drop(&mut self) {
        self.stats.queue_shrank();
    }
}

impl<T> Stream for SourceStage<T> {
    type Item = Result<T, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(error))) => {
                self.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emits_items_then_ends() {
        let mut source = SourceStage::from_iter(vec![1, 2, 3]);
        let mut seen = Vec::new();
        while let Some(item) = source.next().await {
            seen.push(item.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_error_terminates_stage() {
        let items: Vec<Result<u32, BoxError>> = vec![Ok(1), Err("disk gone".into()), Ok(3)];
        let source = SourceStage::from_fallible_iter(items);
        let out: Vec<_> = source.collect().await;

        assert_eq!(out.len(), 2);
        assert_eq!(*out[0].as_ref().unwrap(), 1);
        assert!(matches!(out[1], Err(EngineError::Source { .. })));
    }

    #[tokio::test]
    async fn test_lookahead_preserves_order_and_drains_queue() {
        let stats = Arc::new(StatsRegistry::new());
        let source = SourceStage::from_iter(0..100u32).with_lookahead(8, stats.clone());
        let out: Vec<u32> = source.map(|r| r.unwrap()).collect().await;

        assert_eq!(out, (0..100).collect::<Vec<_>>());
        assert_eq!(stats.snapshot().queue_size, 0);
    }

    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_lookahead_releases_queue_and_upstream() {
        let stats = Arc::new(StatsRegistry::new());
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        // never ends on its own once the first ten items are out
        let upstream = stream::iter(0..10u32).chain(stream::pending()).map(move |v| {
            let _ = &flag;
            Ok::<_, BoxError>(v)
        });
        let mut source = SourceStage::new(upstream).with_lookahead(8, stats.clone());

        assert_eq!(source.next().await.unwrap().unwrap(), 0);
        while stats.snapshot().queue_size < 8 {
            tokio::task::yield_now().await;
        }
        drop(source);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while stats.snapshot().queue_size != 0 || !dropped.load(std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("producer kept running after the consumer went away");
    }

    #[tokio::test]
    async fn test_lookahead_is_bounded() {
        let stats = Arc::new(StatsRegistry::new());
        let mut source = SourceStage::from_iter(0..1000u32).with_lookahead(4, stats.clone());

        assert_eq!(source.next().await.unwrap().unwrap(), 0);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // capacity plus the one item the producer may hold while blocked on send
        assert!(stats.snapshot().queue_size <= 5);
    }
}
