// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! [`ResourceProbe`] over `sysinfo`.

use memory_validation_core::resources::{ResourceProbe, ResourceSnapshot};
use std::sync::Mutex;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples the current process and host.
///
/// CPU usage is measured between consecutive snapshots, so the first reading
/// after construction reports 0.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe").field("pid", &self.pid).finish()
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    /// Probe for the running process.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

fn open_files() -> u64 {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count() as u64)
        .unwrap_or(0)
}

fn fullest_disk_percent() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let used = d.total_space().saturating_sub(d.available_space());
            used as f64 / d.total_space() as f64 * 100.0
        })
        .fold(0.0, f64::max)
}

impl ResourceProbe for SysinfoProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        let Ok(mut system) = self.system.lock() else {
            return ResourceSnapshot::default();
        };
        system.refresh_memory();
        let total_memory = system.total_memory();
        let system_memory_percent = if total_memory > 0 {
            system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let mut reading = ResourceSnapshot {
            system_memory_percent,
            open_files: open_files(),
            disk_percent: fullest_disk_percent(),
            ..ResourceSnapshot::default()
        };

        if let Some(pid) = self.pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
            if let Some(process) = system.process(pid) {
                reading.cpu_percent = f64::from(process.cpu_usage());
                reading.memory_mb = process.memory() as f64 / BYTES_PER_MB;
                if total_memory > 0 {
                    reading.memory_percent = process.memory() as f64 / total_memory as f64 * 100.0;
                }
                reading.threads = process
                    .tasks()
                    .map(|tasks| tasks.len() as u64)
                    .unwrap_or(1);
            }
        }
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_own_process() {
        let probe = SysinfoProbe::new();
        let reading = probe.snapshot();
        assert!(reading.memory_mb > 0.0);
        assert!(reading.threads >= 1);
        assert!((0.0..=100.0).contains(&reading.system_memory_percent));
        assert!((0.0..=100.0).contains(&reading.disk_percent));
    }
}
