//! Execution metrics
//!
//! In-process counters per (test type, status) plus duration statistics of
//! finished executions. Every dispatched execution is counted, including
//! those whose dispatch failed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::models::Execution;

/// Duration percentiles and bounds in milliseconds
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DurationStats {
    /// Calculate statistics from duration samples (in milliseconds)
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Self {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "n={} min={:.0}ms p50={:.0}ms p95={:.0}ms max={:.0}ms",
            self.count, self.min, self.p50, self.p95, self.max
        )
    }
}

/// Interpolated percentile of a sorted slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let idx = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let fraction = idx - lower as f64;

    if upper >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
    }
}

/// Count of executions for one (type, status) pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCount {
    pub test_type: String,
    pub status: String,
    pub count: u64,
}

/// Point-in-time copy of all metrics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub executions: Vec<ExecutionCount>,
    pub durations: BTreeMap<String, DurationStats>,
}

impl MetricsSnapshot {
    pub fn total(&self) -> u64 {
        self.executions.iter().map(|c| c.count).sum()
    }

    pub fn count(&self, test_type: &str, status: &str) -> u64 {
        self.executions
            .iter()
            .find(|c| c.test_type == test_type && c.status == status)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

#[derive(Default)]
struct Counters {
    executions: BTreeMap<(String, String), u64>,
    durations: BTreeMap<String, Vec<f64>>,
}

/// Execution counters shared by all jobs
#[derive(Default)]
pub struct ExecutionMetrics {
    counters: Mutex<Counters>,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one dispatched execution under its current status
    pub fn inc_execute(&self, execution: &Execution) {
        let Ok(mut counters) = self.counters.lock() else {
            return;
        };
        *counters
            .executions
            .entry((
                execution.test_type.clone(),
                execution.status().as_str().to_string(),
            ))
            .or_insert(0) += 1;

        if execution.is_completed() {
            counters
                .durations
                .entry(execution.test_type.clone())
                .or_default()
                .push(execution.calculate_duration().as_secs_f64() * 1000.0);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let Ok(counters) = self.counters.lock() else {
            return MetricsSnapshot::default();
        };
        MetricsSnapshot {
            executions: counters
                .executions
                .iter()
                .map(|((test_type, status), count)| ExecutionCount {
                    test_type: test_type.clone(),
                    status: status.clone(),
                    count: *count,
                })
                .collect(),
            durations: counters
                .durations
                .iter()
                .map(|(test_type, samples)| (test_type.clone(), DurationStats::from_samples(samples)))
                .collect(),
        }
    }
}
