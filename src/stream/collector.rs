// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::errors::BoxError;
use crate::traits::StageSink;

/// Terminal sink that keeps every item it receives, in arrival order.
///
/// Clones share the same storage. [`Collector::results`] returns a copy, so
/// callers cannot mutate what the collector holds.
#[derive(Debug)]
pub struct Collector<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Collector<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.lock().push(item);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        // A panic while pushing cannot leave the Vec half-written
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Collector<T> {
    pub fn results(&self) -> Vec<T> {
        self.lock().clone()
    }
}

#[async_trait]
impl<T> StageSink<T> for Collector<T>
where
    T: Send + 'static,
{
    async fn accept(&self, item: T) -> Result<(), BoxError> {
        self.push(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_in_arrival_order() {
        let collector = Collector::new();
        for v in ["a", "b", "c"] {
            collector.accept(v.to_string()).await.unwrap();
        }
        collector.close().await.unwrap();

        assert_eq!(collector.results(), vec!["a", "b", "c"]);
        assert_eq!(collector.len(), 3);
    }

    #[test]
    fn test_results_is_a_copy() {
        let collector = Collector::new();
        collector.push(1);

        let mut copy = collector.results();
        copy.push(2);
        copy[0] = 99;

        assert_eq!(collector.results(), vec![1]);
    }

    #[test]
    fn test_clones_share_storage() {
        let collector: Collector<u8> = Collector::default();
        let handle = collector.clone();
        handle.push(7);

        assert!(!collector.is_empty());
        assert_eq!(collector.results(), vec![7]);
    }
}
