//! Janitor: idempotent maintenance sweep
//! composing the Knowledge Graph, Ablation Engine, Session Store, and
//! Metrics Ledger's individual prune primitives, plus dialect-specific
//! compaction and debounced ritual logging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::CortexResult;
use crate::knowledge::{AblationEngine, KnowledgeGraph};
use crate::session::SessionStore;
use crate::store::{SledStore, StoreAdapter};

/// Confidence floor below which knowledge is pruned by `runPruningRitual`.
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.2;
/// Age past which a zombie-candidate knowledge item/memory is eligible for pruning.
const ZOMBIE_AGE_DAYS: i64 = 60;
/// Sessions idle this long are archived.
const SESSION_IDLE_DAYS: i64 = 30;
/// Metrics older than this are dropped.
const METRICS_RETENTION_DAYS: i64 = 90;
/// Debounce window for repeated ritual-log entries.
const LOG_DEBOUNCE_MINUTES: i64 = 10;

#[derive(Debug, Default, Clone)]
pub struct MaintenanceReport {
    pub low_confidence_pruned: usize,
    pub zombie_items_pruned: usize,
    pub zombie_memories_pruned: usize,
    pub orphans_cleaned: usize,
    pub sessions_archived: usize,
    pub metrics_pruned: usize,
}

pub struct Janitor {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    knowledge: Arc<KnowledgeGraph>,
    ablation: Arc<AblationEngine>,
    sessions: Arc<SessionStore>,
    metrics: Arc<crate::journal::MetricsLedger>,
    /// Last ritual-log timestamp keyed by `(name, type)`, for debouncing.
    last_logged: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl Janitor {
    pub fn new(
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        knowledge: Arc<KnowledgeGraph>,
        ablation: Arc<AblationEngine>,
        sessions: Arc<SessionStore>,
        metrics: Arc<crate::journal::MetricsLedger>,
    ) -> Self {
        Self {
            store,
            clock,
            knowledge,
            ablation,
            sessions,
            metrics,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// `runPruningRitual`: low-confidence knowledge, zombie items/memories,
    /// and orphaned rows (the `pruning` ritual's three sub-steps).
    #[tracing::instrument(skip(self), target = "cortex::janitor")]
    pub fn run_pruning_ritual(&self) -> CortexResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        report.low_confidence_pruned = self.knowledge.prune_low_confidence(LOW_CONFIDENCE_THRESHOLD)?;
        let (items, memories) = self.ablation.prune_zombies(ZOMBIE_AGE_DAYS)?;
        report.zombie_items_pruned = items;
        report.zombie_memories_pruned = memories;
        report.orphans_cleaned = self.sessions.clean_orphans()?;
        tracing::info!(target: "cortex::janitor", ?report, "pruning ritual complete");
        Ok(report)
    }

    /// Archives sessions idle past `SESSION_IDLE_DAYS` and drops metrics older
    /// than `METRICS_RETENTION_DAYS`.
    #[tracing::instrument(skip(self), target = "cortex::janitor")]
    pub fn sweep_retention(&self) -> CortexResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let session_cutoff = self.clock.now() - chrono::Duration::days(SESSION_IDLE_DAYS);
        report.sessions_archived = self.sessions.archive_inactive(session_cutoff)?;
        let metrics_cutoff = self.clock.now() - chrono::Duration::days(METRICS_RETENTION_DAYS);
        report.metrics_pruned = self.metrics.prune_older_than(metrics_cutoff)?;
        Ok(report)
    }

    /// Autonomous indexing: embedded schemaless dialects have
    /// no columns to index, so this is a logged no-op that documents the
    /// intent the rest of the pipeline expects ("ensure identity indexes on
    /// entity/session_id, inject status-confidence indexes where a
    /// `query_latency` metric flagged a slow (> 300 ms) query"). Relational
    /// store adapters would implement this by issuing `CREATE INDEX`.
    pub fn ensure_indexes(&self) -> CortexResult<()> {
        let slow_query_flagged = self
            .metrics
            .stats(crate::model::METRIC_QUERY_LATENCY, crate::journal::metrics::DEFAULT_WINDOW)
            .map(|stats| stats.current > 300.0)
            .unwrap_or(false);
        tracing::debug!(
            target: "cortex::janitor",
            slow_query_flagged,
            "autonomous indexing is a no-op on the schemaless sled dialect"
        );
        Ok(())
    }

    /// Dialect-specific compaction (`PRAGMA optimize` equivalent).
    pub fn optimize_database(&self) -> CortexResult<()> {
        self.store.run_maintenance()
    }

    /// Runs the full idempotent sweep and returns a combined report.
    #[tracing::instrument(skip(self), target = "cortex::janitor")]
    pub fn run_maintenance_sweep(&self) -> CortexResult<MaintenanceReport> {
        let mut report = self.run_pruning_ritual()?;
        let retention = self.sweep_retention()?;
        report.sessions_archived = retention.sessions_archived;
        report.metrics_pruned = retention.metrics_pruned;
        self.ensure_indexes()?;
        self.optimize_database()?;
        Ok(report)
    }

    /// True if an entry of `(name, kind)` was logged within the last
    /// `LOG_DEBOUNCE_MINUTES`; records the attempt either way so the window
    /// slides forward from the most recent call.
    pub fn should_log_ritual(&self, name: &str, kind: &str) -> bool {
        let now = self.clock.now();
        let key = (name.to_string(), kind.to_string());
        let mut guard = self.last_logged.lock().expect("janitor log-debounce mutex poisoned");
        if let Some(last) = guard.get(&key) {
            if now.signed_duration_since(*last) < chrono::Duration::minutes(LOG_DEBOUNCE_MINUTES) {
                return false;
            }
        }
        guard.insert(key, now);
        true
    }
}
