// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod backpressure;
pub mod batch;
pub mod limiter;
pub mod memory;
pub mod stats;

pub use backpressure::BackpressureController;
pub use batch::{BatchEngine, ErrorHandler, ProcessOptions, ProgressHandler};
pub use limiter::{ConcurrencyLimiter, Slot};
pub use memory::MemorySampler;
pub use stats::{StatsRegistry, StatsSnapshot, WorkGuard};
