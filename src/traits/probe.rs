// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// One reading of process memory, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    /// Resident set size; this is the figure backpressure compares
    pub resident: u64,
    /// Virtual address space reserved by the process
    pub virtual_size: u64,
}

impl MemorySample {
    /// Usage as a fraction of `limit`.
    pub fn ratio(&self, limit: u64) -> f64 {
        if limit == 0 {
            return 0.0;
        }
        self.resident as f64 / limit as f64
    }
}

/// Source of memory readings for the sampler and the backpressure controller.
pub trait MemoryProbe: Send + Sync {
    fn sample(&self) -> MemorySample;

    /// Advisory request to give unused memory back. Correctness never
    /// depends on this doing anything.
    fn reclaim(&self) {}
}

/// Reads the current process through `sysinfo`.
///
/// The `System` handle is cached and only the process's memory figures are
/// refreshed per sample. If the process cannot be resolved the probe reports
/// zeros, which keeps backpressure released.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemoryProbe").field("pid", &self.pid).finish()
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|reason| tracing::warn!(reason, "cannot resolve own pid; memory probe reports zero"))
            .ok();
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_memory()),
            )),
            pid,
        }
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> MemorySample {
        let Some(pid) = self.pid else {
            return MemorySample::default();
        };
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system
            .process(pid)
            .map(|process| MemorySample {
                resident: process.memory(),
                virtual_size: process.virtual_memory(),
            })
            .unwrap_or_default()
    }

    fn reclaim(&self) {
        // The system allocator offers no portable trim call
        tracing::trace!("memory reclaim requested; no allocator hook available");
    }
}
