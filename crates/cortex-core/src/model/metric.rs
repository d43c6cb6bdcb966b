//! Metric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Axes the Evolutionary Pilot watches every cycle.
pub const METRIC_QUERY_LATENCY: &str = "query_latency";
pub const METRIC_SUCCESS_RATE: &str = "success_rate";
pub const METRIC_TOTAL_COST: &str = "total_cost";
pub const METRIC_TRUST_SIGNAL: &str = "trust_signal";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: u64,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub metric_name: String,
    pub metric_value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Derived statistics over a metric window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricStats {
    pub mean: f64,
    pub std_dev: f64,
    pub current: f64,
    pub count: usize,
}

impl MetricStats {
    /// Z-score of `current` against this window's mean/std-dev:
    /// `(value - mean) / max(sigma, floor)`.
    pub fn z_score(&self, floor: f64) -> f64 {
        (self.current - self.mean) / self.std_dev.max(floor)
    }
}

/// Computes mean, population std-dev, and the most recent value as `current`.
/// `values` must be ordered oldest-to-newest; the last element is `current`.
pub fn compute_stats(values: &[f64]) -> MetricStats {
    if values.is_empty() {
        return MetricStats::default();
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    MetricStats {
        mean,
        std_dev: variance.sqrt(),
        current: *values.last().unwrap(),
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_on_empty_window_are_zero() {
        let s = compute_stats(&[]);
        assert_eq!(s.count, 0);
        assert_eq!(s.mean, 0.0);
    }

    #[test]
    fn z_score_uses_floor_when_sigma_is_near_zero() {
        let s = compute_stats(&[0.8, 0.8, 0.8, 0.9]);
        let z = s.z_score(0.1);
        assert!(z.is_finite());
    }
}
