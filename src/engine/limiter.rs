// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Bounded admission for in-flight work.
//!
//! A `tokio::sync::Semaphore` holds `max_concurrency` permits. Each admitted
//! unit of work holds a [`Slot`]; dropping the slot returns the permit and
//! decrements `in_progress`, so release happens on success, on error and on
//! unwinding alike. Waiters are woken in FIFO order.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::engine::stats::StatsRegistry;
use crate::errors::EngineError;

/// Caps simultaneous in-flight work at a fixed number of slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    stats: Arc<StatsRegistry>,
}

/// One held concurrency slot. Released on drop.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    stats: Arc<StatsRegistry>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.stats.end_work();
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter with `max_concurrency` slots (clamped to at least 1).
    pub fn new(max_concurrency: usize, stats: Arc<StatsRegistry>) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            stats,
        }
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) -> Result<Slot, EngineError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Internal {
                message: format!("Failed to acquire concurrency slot: {}", e),
            })?;
        Ok(self.admit(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Slot> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(self.admit(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> Slot {
        self.stats.begin_work();
        Slot {
            _permit: permit,
            stats: self.stats.clone(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.max_concurrency - self.available()
    }
}
