// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process and host resource sampling.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Point-in-time resource reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSnapshot {
    /// Process CPU utilization.
    pub cpu_percent: f64,
    /// Process resident memory in MB.
    pub memory_mb: f64,
    /// Process resident memory as a share of total memory.
    pub memory_percent: f64,
    /// Open file descriptors held by the process.
    pub open_files: u64,
    /// Threads in the process.
    pub threads: u64,
    /// System-wide memory utilization.
    pub system_memory_percent: f64,
    /// Utilization of the fullest mounted disk.
    pub disk_percent: f64,
}

/// Source of resource readings.
pub trait ResourceProbe: Send + Sync {
    /// Take a reading. Probes never fail; unavailable values read as zero.
    fn snapshot(&self) -> ResourceSnapshot;
}

/// Probe returning a preset reading, replaceable at runtime.
#[derive(Debug, Default)]
pub struct FixedResourceProbe {
    reading: Mutex<ResourceSnapshot>,
}

impl FixedResourceProbe {
    /// Probe that always reports `reading`.
    pub fn new(reading: ResourceSnapshot) -> Self {
        Self {
            reading: Mutex::new(reading),
        }
    }

    /// Replace the reading returned from now on.
    pub fn set(&self, reading: ResourceSnapshot) {
        if let Ok(mut guard) = self.reading.lock() {
            *guard = reading;
        }
    }
}

impl ResourceProbe for FixedResourceProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        self.reading.lock().map(|r| *r).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe_reports_latest_reading() {
        let probe = FixedResourceProbe::new(ResourceSnapshot {
            memory_mb: 64.0,
            ..ResourceSnapshot::default()
        });
        assert_eq!(probe.snapshot().memory_mb, 64.0);

        probe.set(ResourceSnapshot {
            memory_mb: 128.0,
            threads: 4,
            ..ResourceSnapshot::default()
        });
        let reading = probe.snapshot();
        assert_eq!(reading.memory_mb, 128.0);
        assert_eq!(reading.threads, 4);
    }
}
