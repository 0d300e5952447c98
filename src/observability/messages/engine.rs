// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for batch run lifecycle events.
//!
//! This module contains message types for logging events related to:
//! * Run start, completion and failure
//! * Reentrancy rejections
//! * Per-batch dispatch and failure

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// A processing run started.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunStarted {
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl Display for RunStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting batch run: batch_size={}, max_concurrency={}",
            self.batch_size, self.max_concurrency
        )
    }
}

impl StructuredLog for RunStarted {
    fn log(&self) {
        tracing::info!(
            batch_size = self.batch_size,
            max_concurrency = self.max_concurrency,
            "{}", self
        );
    }
}

/// A processing run drained its source and all in-flight batches.
///
/// # Log Level
/// `info!` - Important operational event
pub struct RunCompleted {
    pub batches: u64,
    pub processed: u64,
    pub failed: u64,
    pub duration: std::time::Duration,
}

impl Display for RunCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Batch run completed: {} batches, {} processed, {} failed in {:?}",
            self.batches, self.processed, self.failed, self.duration
        )
    }
}

impl StructuredLog for RunCompleted {
    fn log(&self) {
        tracing::info!(
            batches = self.batches,
            processed = self.processed,
            failed = self.failed,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }
}

/// A processing run ended with an error.
///
/// # Log Level
/// `error!` - The run is aborted
pub struct RunFailed<'a> {
    pub kind: &'a str,
    pub error: &'a dyn std::error::Error,
    pub duration: std::time::Duration,
}

impl Display for RunFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Batch run failed after {:?} ({}): {}",
            self.duration, self.kind, self.error
        )
    }
}

impl StructuredLog for RunFailed<'_> {
    fn log(&self) {
        tracing::error!(
            kind = self.kind,
            error = %self.error,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }
}

/// A second run was attempted while one is active.
///
/// # Log Level
/// `warn!` - Caller error, no state changed
pub struct RunRejectedBusy;

impl Display for RunRejectedBusy {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Rejected batch run: engine is already processing")
    }
}

impl StructuredLog for RunRejectedBusy {
    fn log(&self) {
        tracing::warn!("{}", self);
    }
}

/// A run exited after a shutdown had already detached it from the engine.
///
/// # Log Level
/// `warn!` - Its stats were not counted and the engine was left as is
pub struct RunDetached {
    pub run_id: u64,
}

impl Display for RunDetached {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Batch run {} finished after shutdown detached it", self.run_id)
    }
}

impl StructuredLog for RunDetached {
    fn log(&self) {
        tracing::warn!(run_id = self.run_id, "{}", self);
    }
}

/// A batch was handed to the transform.
///
/// # Log Level
/// `debug!` - Per-batch detail
pub struct BatchDispatched {
    pub batch_index: u64,
    pub batch_len: usize,
    pub in_flight: usize,
}

impl Display for BatchDispatched {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dispatched batch {} ({} items, {} in flight)",
            self.batch_index, self.batch_len, self.in_flight
        )
    }
}

impl BatchDispatched {
    /// Span the batch task runs under.
    pub fn span(&self) -> tracing::Span {
        tracing::debug_span!("batch", batch_index = self.batch_index, batch_len = self.batch_len)
    }
}

impl StructuredLog for BatchDispatched {
    fn log(&self) {
        tracing::debug!(
            batch_index = self.batch_index,
            batch_len = self.batch_len,
            in_flight = self.in_flight,
            "{}", self
        );
    }
}

/// A batch transform returned an error.
///
/// # Log Level
/// `warn!` when an error handler absorbs it, `error!` when it aborts the run
pub struct BatchFailed<'a> {
    pub batch_index: u64,
    pub batch_len: usize,
    pub handled: bool,
    pub error: &'a str,
}

impl Display for BatchFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let outcome = if self.handled { "reported" } else { "aborting run" };
        write!(
            f,
            "Batch {} ({} items) failed, {}: {}",
            self.batch_index, self.batch_len, outcome, self.error
        )
    }
}

impl StructuredLog for BatchFailed<'_> {
    fn log(&self) {
        if self.handled {
            tracing::warn!(
                batch_index = self.batch_index,
                batch_len = self.batch_len,
                error = self.error,
                "{}", self
            );
        } else {
            tracing::error!(
                batch_index = self.batch_index,
                batch_len = self.batch_len,
                error = self.error,
                "{}", self
            );
        }
    }
}
