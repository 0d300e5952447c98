// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-item stream stages.
//!
//! Three stage kinds compose into a [`Pipeline`]: a [`SourceStage`] that
//! adapts a lazy producer, any number of [`TransformStage`]s, and a sink
//! such as [`Collector`]. Stages pass `Result<T, EngineError>` items so an
//! error raised anywhere travels downstream to the pipeline result, and
//! dropping the pipeline stops every upstream stage.

pub mod collector;
pub mod pipeline;
pub mod source;
pub mod transform;

pub use collector::Collector;
pub use pipeline::Pipeline;
pub use source::SourceStage;
pub use transform::{TransformOptions, TransformStage};
