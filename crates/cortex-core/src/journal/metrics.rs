//! Metrics Ledger.
//!
//! Append-only numeric observations; stats are derived on read, never stored.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::CortexResult;
use crate::model::{compute_stats, Metric, MetricStats};
use crate::store::SledStore;

/// Number of most-recent samples the Evolutionary Pilot and Strategic
/// Planner read per axis.
pub const DEFAULT_WINDOW: usize = 100;

pub struct MetricsLedger {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl MetricsLedger {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
        }
    }

    #[tracing::instrument(skip(self, metadata), target = "cortex::metrics")]
    pub fn record(
        &self,
        metric_name: &str,
        value: f64,
        session_id: Option<Uuid>,
        agent_id: Option<String>,
        unit: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> CortexResult<Metric> {
        let id = self.store.next_id("metrics")? as u64;
        let metric = Metric {
            id,
            session_id,
            agent_id,
            metric_name: metric_name.to_string(),
            metric_value: value,
            unit,
            metadata,
            created_at: self.clock.now(),
        };
        self.store.put(&self.table, &id.to_string(), &metric)?;
        tracing::debug!(target: "cortex::metrics", metric_name, value, "recorded metric");
        Ok(metric)
    }

    /// All rows matching `metric_name`, oldest first.
    fn rows_for(&self, metric_name: &str) -> CortexResult<Vec<Metric>> {
        let mut rows: Vec<Metric> = self
            .store
            .scan::<Metric>(&self.table)?
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| m.metric_name == metric_name)
            .collect();
        rows.sort_by_key(|m| m.id);
        Ok(rows)
    }

    /// Statistics over the most recent `window` samples for `metric_name`.
    pub fn stats(&self, metric_name: &str, window: usize) -> CortexResult<MetricStats> {
        let rows = self.rows_for(metric_name)?;
        let tail: Vec<f64> = rows
            .iter()
            .rev()
            .take(window)
            .rev()
            .map(|m| m.metric_value)
            .collect();
        Ok(compute_stats(&tail))
    }

    pub fn stats_default_window(&self, metric_name: &str) -> CortexResult<MetricStats> {
        self.stats(metric_name, DEFAULT_WINDOW)
    }

    /// Statistics over the most recent `window` samples for `metric_name`
    /// restricted to a single `agent_id`.
    pub fn stats_for_agent(&self, metric_name: &str, agent_id: &str, window: usize) -> CortexResult<MetricStats> {
        let tail: Vec<f64> = self
            .rows_for(metric_name)?
            .into_iter()
            .filter(|m| m.agent_id.as_deref() == Some(agent_id))
            .rev()
            .take(window)
            .rev()
            .map(|m| m.metric_value)
            .collect();
        Ok(compute_stats(&tail))
    }

    /// Sum of `metric_name` values recorded since `since`.
    pub fn sum_since(&self, metric_name: &str, since: DateTime<Utc>) -> CortexResult<f64> {
        Ok(self
            .rows_for(metric_name)?
            .into_iter()
            .filter(|m| m.created_at >= since)
            .map(|m| m.metric_value)
            .sum())
    }

    /// Average of `metric_name` values recorded since `since`.
    pub fn average_since(&self, metric_name: &str, since: DateTime<Utc>) -> CortexResult<Option<f64>> {
        let values: Vec<f64> = self
            .rows_for(metric_name)?
            .into_iter()
            .filter(|m| m.created_at >= since)
            .map(|m| m.metric_value)
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    /// Rate (sum per minute) of `metric_name` in the last-`minutes` window;
    /// used by EmergenceAuditor to compare a short window's rate against a
    /// longer preceding one.
    pub fn rate_over_minutes(&self, metric_name: &str, minutes: i64) -> CortexResult<f64> {
        let now = self.clock.now();
        let since = now - chrono::Duration::minutes(minutes);
        let total = self.sum_since(metric_name, since)?;
        Ok(total / minutes.max(1) as f64)
    }

    /// Every distinct metric name observed, for the EmergenceAuditor's scan.
    pub fn known_metric_names(&self) -> CortexResult<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .scan::<Metric>(&self.table)?
            .into_iter()
            .map(|(_, m)| m.metric_name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Deletes metrics older than `cutoff`.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> CortexResult<usize> {
        let mut pruned = 0;
        for (id, metric) in self.store.scan::<Metric>(&self.table)? {
            if metric.created_at < cutoff {
                self.store.delete(&self.table, &id)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn ledger() -> MetricsLedger {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        MetricsLedger::new(store, clock, "agent_metrics")
    }

    #[test]
    fn stats_reflect_only_the_requested_metric() {
        let ledger = ledger();
        for v in [0.8, 0.8, 0.9] {
            ledger
                .record("success_rate", v, None, None, None, BTreeMap::new())
                .unwrap();
        }
        ledger
            .record("query_latency", 900.0, None, None, None, BTreeMap::new())
            .unwrap();
        let stats = ledger.stats_default_window("success_rate").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.current - 0.9).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_only_most_recent_samples() {
        let ledger = ledger();
        for v in 0..20 {
            ledger
                .record("success_rate", v as f64, None, None, None, BTreeMap::new())
                .unwrap();
        }
        let stats = ledger.stats("success_rate", 5).unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.current, 19.0);
    }
}
