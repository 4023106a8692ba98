// Copyright 2025 Memory Validation Contributors
// SPDX-License-Identifier: Apache-2.0

//! Latency statistics.
//!
//! Percentiles use nearest-rank on the ascending sample: the p95 index is
//! `floor(0.95 * n)` and the p99 index is `floor(0.99 * n)`, both clamped to
//! `n - 1`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reduced latency sample, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatencyStats {
    /// Arithmetic mean.
    pub avg_ms: f64,
    /// Smallest sample.
    pub min_ms: f64,
    /// Largest sample.
    pub max_ms: f64,
    /// 95th percentile.
    pub p95_ms: f64,
    /// 99th percentile.
    pub p99_ms: f64,
    /// Number of samples.
    pub sample_count: usize,
}

impl LatencyStats {
    /// Reduce samples in milliseconds. An empty sample yields all zeros.
    pub fn from_millis(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let sum: f64 = sorted.iter().sum();

        Self {
            avg_ms: sum / n as f64,
            min_ms: sorted[0],
            max_ms: sorted[n - 1],
            p95_ms: sorted[percentile_index(n, 95)],
            p99_ms: sorted[percentile_index(n, 99)],
            sample_count: n,
        }
    }

    /// Reduce samples given as durations.
    pub fn from_durations(samples: &[Duration]) -> Self {
        let millis: Vec<f64> = samples.iter().map(|d| duration_ms(*d)).collect();
        Self::from_millis(&millis)
    }
}

/// Nearest-rank index for `percentile` over `n` sorted samples.
///
/// Returns 0 for an empty sample so callers never index out of bounds.
pub fn percentile_index(n: usize, percentile: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (n * percentile / 100).min(n - 1)
}

/// Operations per second over `elapsed`; zero when nothing elapsed.
pub fn throughput(operations: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    operations as f64 / secs
}

/// Fraction of failed operations; zero when nothing ran.
pub fn error_rate(failed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    failed as f64 / total as f64
}

/// Duration as fractional milliseconds.
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
