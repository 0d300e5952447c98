// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and operational
//! logging throughout the engine. Message types follow a struct-based pattern
//! with `Display` trait implementation to:
//!
//! * Eliminate magic strings scattered throughout the codebase
//! * Keep field names consistent between the human-readable line and the structured fields
//! * Provide consistent, structured logging output
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - Batch run lifecycle and per-batch events
//! * `messages::memory` - Memory sampling and backpressure transitions
//! * `messages::stream` - Stream stage and pipeline events
//!
//! # Usage
//!
//! ```rust
//! use the_sluice::observability::messages::engine::BatchFailed;
//! use the_sluice::observability::messages::StructuredLog;
//!
//! let msg = BatchFailed {
//!     batch_index: 7,
//!     batch_len: 1000,
//!     handled: true,
//!     error: "upstream timeout",
//! };
//!
//! msg.log();
//! ```

pub mod messages;
