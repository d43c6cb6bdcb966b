//! Evolutionary Pilot: the top-level closed loop the Ritual
//! Orchestrator's `optimization` dispatch calls into through the
//! `EvolutionHook` port — observe metrics, dispatch a mutation or emergency
//! ritual as thresholds warrant, then audit.

use std::sync::Arc;

use async_trait::async_trait;

use cortex_core::clock::Clock;
use cortex_core::error::CortexResult;
use cortex_core::governance::GovernanceAuditor;
use cortex_core::journal::MetricsLedger;
use cortex_core::model::{
    MetricStats, Ritual, RitualFrequency, RitualMetadata, RitualStatus, RitualType, METRIC_QUERY_LATENCY, METRIC_SUCCESS_RATE,
    METRIC_TOTAL_COST, METRIC_TRUST_SIGNAL,
};
use cortex_core::ports::EvolutionHook;
use cortex_core::store::SledStore;

use crate::planner::{MutationOutcome, StrategicPlanner};

const LATENCY_Z_TRIGGER: f64 = 2.0;
const LATENCY_MEAN_TRIGGER_MS: f64 = 1000.0;
const SUCCESS_Z_TRIGGER: f64 = -1.5;
const SUCCESS_MEAN_TRIGGER: f64 = 0.7;
const COST_Z_TRIGGER: f64 = 2.5;
/// Floor for a near-zero sigma, matching `StrategicPlanner`'s convention.
const Z_FLOOR: f64 = 0.01;

/// Outcome of one `run_cycle` pass, for callers and tests that want more
/// than the `EvolutionHook`'s `Result<(), String>`.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub latency_optimization_scheduled: bool,
    pub mutation_outcomes: Vec<MutationOutcome>,
    pub compression_scheduled: bool,
    pub audit_issue_count: usize,
    pub healthy: bool,
}

pub struct EvolutionaryPilot {
    metrics: Arc<MetricsLedger>,
    planner: Arc<StrategicPlanner>,
    governance: Arc<GovernanceAuditor>,
    rituals_store: Arc<SledStore>,
    rituals_table: String,
    clock: Arc<dyn Clock>,
}

impl EvolutionaryPilot {
    pub fn new(
        metrics: Arc<MetricsLedger>,
        planner: Arc<StrategicPlanner>,
        governance: Arc<GovernanceAuditor>,
        rituals_store: Arc<SledStore>,
        rituals_table: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            metrics,
            planner,
            governance,
            rituals_store,
            rituals_table: rituals_table.into(),
            clock,
        }
    }

    fn schedule_emergency_ritual(&self, name: &str, kind: RitualType) -> CortexResult<Ritual> {
        let now = self.clock.now();
        let id = self.rituals_store.next_id("rituals")?;
        let mut metadata = RitualMetadata::default();
        metadata.extra.insert("priority".into(), serde_json::json!("high"));
        metadata.extra.insert("triggered_by".into(), serde_json::json!("evolutionary_pilot"));
        let ritual = Ritual {
            id,
            name: name.to_string(),
            kind,
            frequency: RitualFrequency::Hourly,
            status: RitualStatus::Pending,
            last_run: None,
            next_run: now,
            locked_until: None,
            metadata,
        };
        self.rituals_store.put(&self.rituals_table, &id.to_string(), &ritual)?;
        tracing::info!(target: "cortex::evolution::pilot", ritual = name, "scheduled emergency ritual");
        Ok(ritual)
    }

    /// Runs one self-improvement cycle: read the last-100 samples of every
    /// axis the pilot watches, dispatch as thresholds
    /// warrant, then audit.
    #[tracing::instrument(skip(self), target = "cortex::evolution::pilot")]
    pub async fn run_cycle(&self) -> CortexResult<CycleReport> {
        let mut report = CycleReport::default();

        let latency = self.metrics.stats_default_window(METRIC_QUERY_LATENCY)?;
        let success = self.metrics.stats_default_window(METRIC_SUCCESS_RATE)?;
        let cost = self.metrics.stats_default_window(METRIC_TOTAL_COST)?;
        // trust_signal is observed every cycle but has no dispatch trigger of
        // its own yet.
        let _trust = self.metrics.stats_default_window(METRIC_TRUST_SIGNAL)?;

        if z_score(&latency, Z_FLOOR) > LATENCY_Z_TRIGGER || latency.mean > LATENCY_MEAN_TRIGGER_MS {
            self.schedule_emergency_ritual("Emergency Latency Optimization", RitualType::Optimization)?;
            report.latency_optimization_scheduled = true;
        }

        if z_score(&success, Z_FLOOR) < SUCCESS_Z_TRIGGER || success.mean < SUCCESS_MEAN_TRIGGER {
            report.mutation_outcomes = self.planner.mutate_strategy()?;
        }

        if z_score(&cost, Z_FLOOR) > COST_Z_TRIGGER {
            self.schedule_emergency_ritual("Emergency Compression", RitualType::Compression)?;
            report.compression_scheduled = true;
        }

        let issues = self.governance.perform_audit()?;
        report.audit_issue_count = issues.len();
        report.healthy = issues.is_empty();
        if !report.healthy {
            tracing::warn!(target: "cortex::evolution::pilot", issues = report.audit_issue_count, "self-improvement cycle finished unhealthy");
        }
        Ok(report)
    }
}

fn z_score(stats: &MetricStats, floor: f64) -> f64 {
    (stats.current - stats.mean) / stats.std_dev.max(floor)
}

#[async_trait]
impl EvolutionHook for EvolutionaryPilot {
    async fn run_self_improvement_cycle(&self) -> Result<(), String> {
        self.run_cycle().await.map(|_| ()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::capability::CapabilityRegistry;
    use cortex_core::clock::FixedClock;
    use cortex_core::config::{EvolutionConfig, StrategyConfig};
    use cortex_core::governance::{PolicyEnforcer, RuleEngine};
    use cortex_core::journal::{ActionJournal, ReflectionLog};
    use cortex_core::persona::PersonaStore;
    use cortex_core::store::SledStore;
    use chrono::Utc;

    fn pilot() -> (EvolutionaryPilot, Arc<MetricsLedger>, Arc<SledStore>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let personas = Arc::new(PersonaStore::new(store.clone(), clock.clone(), "agent_personas"));
        let actions = Arc::new(ActionJournal::new(store.clone(), clock.clone(), "agent_actions"));
        let reflections = Arc::new(ReflectionLog::new(store.clone(), clock.clone(), "agent_reflections", "agent_goals"));
        let rules = Arc::new(RuleEngine::new(store.clone(), clock.clone(), "agent_rules"));
        let capabilities = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), "agent_capabilities"));
        let policies = Arc::new(PolicyEnforcer::new(store.clone(), clock.clone(), metrics.clone(), "agent_policies", 60));
        let mut probe_registry = crate::probe::LogicProbeRegistry::new(store.clone(), clock.clone(), "agent_logic_probes");
        probe_registry.register(Arc::new(crate::probe::MutationHistoryCapProbe::new(personas.clone())));
        probe_registry.register(Arc::new(crate::probe::SingleAlphaPerLineageProbe::new(capabilities.clone())));
        let probes = Arc::new(probe_registry);
        let planner = Arc::new(StrategicPlanner::new(
            personas.clone(),
            metrics.clone(),
            actions,
            reflections.clone(),
            rules,
            probes,
            clock.clone(),
            EvolutionConfig::default(),
            StrategyConfig::default(),
        ));
        let governance = Arc::new(GovernanceAuditor::new(
            metrics.clone(),
            policies,
            personas,
            capabilities,
            reflections,
            clock.clone(),
            store.clone(),
            "agent_rituals",
        ));
        let pilot = EvolutionaryPilot::new(metrics.clone(), planner, governance, store.clone(), "agent_rituals", clock);
        (pilot, metrics, store)
    }

    #[tokio::test]
    async fn an_empty_store_runs_a_healthy_no_op_cycle() {
        let (pilot, _, _) = pilot();
        let report = pilot.run_cycle().await.unwrap();
        assert!(!report.latency_optimization_scheduled);
        assert!(!report.compression_scheduled);
        assert!(report.healthy);
    }

    #[tokio::test]
    async fn sustained_high_latency_schedules_an_emergency_ritual() {
        let (pilot, metrics, store) = pilot();
        for _ in 0..10 {
            metrics.record(METRIC_QUERY_LATENCY, 1500.0, None, None, None, Default::default()).unwrap();
        }
        let report = pilot.run_cycle().await.unwrap();
        assert!(report.latency_optimization_scheduled);
        let rituals: Vec<Ritual> = store.scan::<Ritual>("agent_rituals").unwrap().into_iter().map(|(_, r)| r).collect();
        assert!(rituals.iter().any(|r| r.name == "Emergency Latency Optimization"));
    }

    #[tokio::test]
    async fn a_cost_spike_schedules_emergency_compression() {
        let (pilot, metrics, _) = pilot();
        for v in [0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 5.0] {
            metrics.record(METRIC_TOTAL_COST, v, None, None, None, Default::default()).unwrap();
        }
        let report = pilot.run_cycle().await.unwrap();
        assert!(report.compression_scheduled);
    }

    #[tokio::test]
    async fn the_evolution_hook_trait_object_runs_without_error() {
        let (pilot, _, _) = pilot();
        let hook: Arc<dyn EvolutionHook> = Arc::new(pilot);
        hook.run_self_improvement_cycle().await.unwrap();
    }
}
