// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Items accumulated before a batch is dispatched
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Maximum simultaneous in-flight batches
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
/// Buffering hint for stream stages (items of lookahead)
pub const DEFAULT_HIGH_WATER_MARK: usize = 16_384;
/// Fraction of the memory limit at which intake pauses
pub const DEFAULT_BACKPRESSURE_THRESHOLD: f64 = 0.8;
/// Denominator for the backpressure ratio (512 MiB)
pub const DEFAULT_MEMORY_LIMIT: u64 = 512 * 1024 * 1024;
/// Release bound multiplier: intake resumes at or below `threshold * factor`
pub const DEFAULT_RELEASE_FACTOR: f64 = 0.7;
/// Re-sample interval while backpressure is active
pub const DEFAULT_BACKPRESSURE_POLL_INTERVAL_MS: u64 = 100;
/// Background memory sample interval
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 5_000;
/// Buffered memory samples per subscriber before lagging
pub const DEFAULT_SAMPLE_CHANNEL_CAPACITY: usize = 16;
