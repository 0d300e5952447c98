// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod probe;
pub mod sink;
pub mod transform;

pub use probe::{MemoryProbe, MemorySample, ProcessMemoryProbe};
pub use sink::StageSink;
pub use transform::{BatchTransform, ItemTransform};
