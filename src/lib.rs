// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod config;     // engine config, loading + validation
pub mod engine;     // batch engine, limiter, backpressure, stats
pub mod errors;     // error handling
pub mod observability;
pub mod stream;     // per-item stages and pipelines
pub mod traits;     // transform, sink and memory probe seams

pub use config::EngineConfig;
pub use engine::{BatchEngine, ProcessOptions, StatsSnapshot};
pub use errors::{BoxError, ConfigError, EngineError};
