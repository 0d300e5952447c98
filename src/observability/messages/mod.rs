// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human-readable line and
//! [`StructuredLog`] to emit the same event with typed fields at its
//! designated level.
//!
//! # Organization
//!
//! * `engine` - Batch run lifecycle and per-batch events
//! * `memory` - Memory sampler and backpressure events
//! * `stream` - Stream stage and pipeline events
//!
//! # Usage Pattern
//!
//! ```rust
//! use the_sluice::observability::messages::engine::RunStarted;
//!
//! let msg = RunStarted {
//!     batch_size: 1000,
//!     max_concurrency: 5,
//! };
//!
//! tracing::info!("{}", msg);
//! ```

pub mod engine;
pub mod memory;
pub mod stream;

/// Emit a message as a structured `tracing` event at its designated level.
pub trait StructuredLog {
    /// Log the event with structured fields.
    fn log(&self);
}
