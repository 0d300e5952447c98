// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for stream stages and pipelines.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// An item failed inside a stage.
///
/// # Log Level
/// `warn!` - The stage may still drain or swallow the error
pub struct StageItemFailed<'a> {
    pub stage: &'a str,
    pub swallowed: bool,
    pub error: &'a str,
}

impl Display for StageItemFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let outcome = if self.swallowed { "swallowed" } else { "propagating" };
        write!(f, "Item failed in stage '{}' ({}): {}", self.stage, outcome, self.error)
    }
}

impl StructuredLog for StageItemFailed<'_> {
    fn log(&self) {
        tracing::warn!(
            stage = self.stage,
            swallowed = self.swallowed,
            error = self.error,
            "{}", self
        );
    }
}

/// A pipeline ran to completion or stopped on its first error.
///
/// # Log Level
/// `debug!` on success, `error!` on failure
pub struct PipelineFinished<'a> {
    pub items: u64,
    pub error: Option<&'a str>,
    pub duration: std::time::Duration,
}

impl Display for PipelineFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.error {
            None => write!(
                f,
                "Pipeline completed: {} items delivered in {:?}",
                self.items, self.duration
            ),
            Some(error) => write!(
                f,
                "Pipeline stopped after {} items in {:?}: {}",
                self.items, self.duration, error
            ),
        }
    }
}

impl StructuredLog for PipelineFinished<'_> {
    fn log(&self) {
        match self.error {
            None => tracing::debug!(
                items = self.items,
                duration_ms = self.duration.as_millis() as u64,
                "{}", self
            ),
            Some(error) => tracing::error!(
                items = self.items,
                duration_ms = self.duration.as_millis() as u64,
                error = error,
                "{}", self
            ),
        }
    }
}
