//! Strategic Planner: the persona mutation -> verify ->
//! stabilize/rollback loop.

use std::sync::Arc;

use uuid::Uuid;

use cortex_core::clock::Clock;
use cortex_core::config::{EvolutionConfig, StrategyConfig};
use cortex_core::error::{CortexError, CortexResult};
use cortex_core::governance::RuleEngine;
use cortex_core::journal::metrics::DEFAULT_WINDOW;
use cortex_core::journal::{ActionJournal, MetricsLedger, ReflectionLog};
use cortex_core::model::{
    EvolutionStatus, MutationType, Persona, PersonaMutation, PersonaState, RuleAction, RuleMetadata,
    RuleOperation, ToolFailureSummary, VerificationBaseline, METRIC_QUERY_LATENCY, METRIC_SUCCESS_RATE,
};
use cortex_core::persona::PersonaStore;

use crate::probe::LogicProbeRegistry;

/// Rollbacks within this window count toward the adaptive sample-size base.
const RECENT_ROLLBACK_WINDOW_DAYS: i64 = 7;
/// Hive-trusted peer count above which the verification threshold halves.
const HIVE_TRUST_MIN_PEERS: usize = 3;
/// An early, strongly positive Z-score that lets the threshold drop straight to 5.
const EARLY_Z_BREAKOUT: f64 = 3.0;
const EARLY_Z_MIN_SAMPLES: usize = 5;
const REDUCED_THRESHOLD: u32 = 5;
const ROLLBACK_Z: f64 = -2.0;
const STABILIZE_Z: f64 = -0.5;
const VERIFICATION_TIMEOUT_DAYS: i64 = 3;
const CRITICAL_Z_K: f64 = 2.5;
const ACCURACY_Z_K: f64 = 1.0;
const EFFICIENCY_Z_K: f64 = 2.0;
/// Floor for a near-zero sigma in the Z-score denominator; small enough that a
/// real (nonzero) sample sigma is never overridden by it.
const Z_FLOOR: f64 = 0.01;
const ROLE_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Stabilized(String),
    RolledBack(String),
    Mutated(String),
    Skipped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recommendation {
    CriticalIntervention,
    OptimizeAccuracy,
    OptimizeEfficiency,
    Maintain,
}

impl Recommendation {
    fn as_str(self) -> &'static str {
        match self {
            Self::CriticalIntervention => "critical_intervention",
            Self::OptimizeAccuracy => "optimize_accuracy",
            Self::OptimizeEfficiency => "optimize_efficiency",
            Self::Maintain => "maintain",
        }
    }
}

pub struct StrategicPlanner {
    personas: Arc<PersonaStore>,
    metrics: Arc<MetricsLedger>,
    actions: Arc<ActionJournal>,
    reflections: Arc<ReflectionLog>,
    rules: Arc<RuleEngine>,
    probes: Arc<LogicProbeRegistry>,
    clock: Arc<dyn Clock>,
    evolution: EvolutionConfig,
    strategy: StrategyConfig,
}

impl StrategicPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        personas: Arc<PersonaStore>,
        metrics: Arc<MetricsLedger>,
        actions: Arc<ActionJournal>,
        reflections: Arc<ReflectionLog>,
        rules: Arc<RuleEngine>,
        probes: Arc<LogicProbeRegistry>,
        clock: Arc<dyn Clock>,
        evolution: EvolutionConfig,
        strategy: StrategyConfig,
    ) -> Self {
        Self {
            personas,
            metrics,
            actions,
            reflections,
            rules,
            probes,
            clock,
            evolution,
            strategy,
        }
    }

    /// Runs one cycle of the evolution loop over every persona. Pre-flight
    /// logic probes gate the whole cycle: any failure aborts and returns an
    /// empty list.
    #[tracing::instrument(skip(self), target = "cortex::evolution::planner")]
    pub fn mutate_strategy(&self) -> CortexResult<Vec<MutationOutcome>> {
        if !self.probes.run_all()? {
            tracing::warn!(target: "cortex::evolution::planner", "pre-flight logic probe failure; aborting cycle");
            return Ok(Vec::new());
        }

        let personas = self.personas.all()?;
        let failure_report = self.actions.failure_report(DEFAULT_WINDOW)?;

        let mut outcomes = Vec::new();
        for persona in &personas {
            if persona.metadata.evolution_status == EvolutionStatus::Verifying {
                if let Some(outcome) = self.run_verification_monitor(persona)? {
                    outcomes.push(outcome);
                }
                continue;
            }

            let recommendation = self.analyze_persona(persona)?;
            if recommendation == Recommendation::Maintain {
                continue;
            }
            if self.is_blacklisted(persona, recommendation.as_str(), &personas) {
                outcomes.push(MutationOutcome::Skipped(format!(
                    "persona {} skipped: {} is blacklisted",
                    persona.name,
                    recommendation.as_str()
                )));
                continue;
            }
            if let Some(outcome) = self.dispatch_mutation(persona, recommendation, &failure_report, &personas)? {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    /// Adaptive sample-size threshold, Z-score against the verification
    /// baseline, and the stabilize/rollback/timeout decision.
    fn run_verification_monitor(&self, persona: &Persona) -> CortexResult<Option<MutationOutcome>> {
        let now = self.clock.now();
        let Some(baseline) = persona.metadata.verification_baseline.clone() else {
            return Ok(None);
        };

        let recent_rollbacks = persona
            .metadata
            .rollback_history
            .iter()
            .filter(|t| now.signed_duration_since(**t) < chrono::Duration::days(RECENT_ROLLBACK_WINDOW_DAYS))
            .count() as u32;
        let mut threshold = self.evolution.verification_window * (1 + recent_rollbacks);

        if self.evolution.enable_hive_link {
            if let Some(reason) = &persona.metadata.mutation_reason {
                let trusted_peers = self
                    .personas
                    .all()?
                    .into_iter()
                    .filter(|p| {
                        p.id != persona.id
                            && p.metadata.evolution_status == EvolutionStatus::Stable
                            && p.metadata.mutation_reason.as_deref() == Some(reason.as_str())
                    })
                    .count();
                if trusted_peers >= HIVE_TRUST_MIN_PEERS {
                    threshold = (threshold / 2).max(REDUCED_THRESHOLD);
                }
            }
        }

        let stats = self.metrics.stats_for_agent(METRIC_SUCCESS_RATE, &persona.name, DEFAULT_WINDOW)?;
        let samples = stats.count;
        let z = (stats.current - baseline.success_rate) / stats.std_dev.max(Z_FLOOR);

        if samples >= EARLY_Z_MIN_SAMPLES && z > EARLY_Z_BREAKOUT {
            threshold = REDUCED_THRESHOLD;
        }

        if z < ROLLBACK_Z {
            let rolled_back = self.personas.rollback(persona.id, format!("verification Z={z:.2} breached {ROLLBACK_Z}"))?;
            return Ok(Some(MutationOutcome::RolledBack(rolled_back.name)));
        }

        if samples as u32 >= 2 * threshold && z >= STABILIZE_Z {
            let reason = persona.metadata.mutation_reason.clone();
            let persona_id = persona.id;
            let stabilized = self.personas.update(persona_id, move |current| {
                let mut p = current.ok_or_else(|| CortexError::not_found("Persona", persona_id.to_string()))?;
                p.metadata.evolution_status = EvolutionStatus::Stable;
                Ok(Some(p))
            })?;
            if reason.as_deref() == Some("optimize_efficiency") {
                self.rules
                    .define_rule("all", RuleOperation::All, Some("latency > 500".into()), RuleAction::Audit, 0, RuleMetadata::default())?;
            }
            return Ok(Some(MutationOutcome::Stabilized(format!(
                "Evolution stabilized for persona {}",
                stabilized.name
            ))));
        }

        let verification_started = persona.metadata.verification_started_at.unwrap_or(now);
        if now.signed_duration_since(verification_started) > chrono::Duration::days(VERIFICATION_TIMEOUT_DAYS) {
            let rolled_back = self.personas.rollback(persona.id, "verification exceeded 3 days without stabilizing")?;
            return Ok(Some(MutationOutcome::RolledBack(rolled_back.name)));
        }

        Ok(None)
    }

    /// Dynamic thresholds (`mean ± k*sigma`) over the global population's
    /// recent success-rate and latency metrics.
    fn analyze_persona(&self, persona: &Persona) -> CortexResult<Recommendation> {
        let global_success = self.metrics.stats_default_window(METRIC_SUCCESS_RATE)?;
        let global_latency = self.metrics.stats_default_window(METRIC_QUERY_LATENCY)?;
        let persona_success = self.metrics.stats_for_agent(METRIC_SUCCESS_RATE, &persona.name, DEFAULT_WINDOW)?.current;
        let persona_latency = self.metrics.stats_for_agent(METRIC_QUERY_LATENCY, &persona.name, DEFAULT_WINDOW)?.current;

        if persona_success < global_success.mean - CRITICAL_Z_K * global_success.std_dev {
            return Ok(Recommendation::CriticalIntervention);
        }
        if persona_success < global_success.mean - ACCURACY_Z_K * global_success.std_dev {
            return Ok(Recommendation::OptimizeAccuracy);
        }
        if persona_latency > global_latency.mean + EFFICIENCY_Z_K * global_latency.std_dev {
            return Ok(Recommendation::OptimizeEfficiency);
        }
        Ok(Recommendation::Maintain)
    }

    /// Skip if another persona's `last_failed_mutation` carries the same
    /// recommendation within the global blacklist window, or this persona's
    /// own within the (longer) local window.
    fn is_blacklisted(&self, persona: &Persona, recommendation: &str, all: &[Persona]) -> bool {
        let now = self.clock.now();
        let global_window = chrono::Duration::seconds(self.strategy.global_blacklist_duration_secs);
        let local_window = chrono::Duration::seconds(self.strategy.local_blacklist_duration_secs);

        let globally_blacklisted = all.iter().any(|p| {
            p.metadata
                .last_failed_mutation
                .as_ref()
                .map(|f| f.recommendation == recommendation && now.signed_duration_since(f.timestamp) < global_window)
                .unwrap_or(false)
        });
        if globally_blacklisted {
            return true;
        }
        persona
            .metadata
            .last_failed_mutation
            .as_ref()
            .map(|f| f.recommendation == recommendation && now.signed_duration_since(f.timestamp) < local_window)
            .unwrap_or(false)
    }

    fn dispatch_mutation(
        &self,
        persona: &Persona,
        recommendation: Recommendation,
        failure_report: &[ToolFailureSummary],
        all: &[Persona],
    ) -> CortexResult<Option<MutationOutcome>> {
        if recommendation == Recommendation::CriticalIntervention {
            return match self.personas.rollback(persona.id, "critical_intervention recommended") {
                Ok(rolled_back) => Ok(Some(MutationOutcome::RolledBack(rolled_back.name))),
                Err(CortexError::Inconsistent(reason)) => Ok(Some(MutationOutcome::Skipped(format!(
                    "persona {} has no mutation history to roll back: {reason}",
                    persona.name
                )))),
                Err(other) => Err(other),
            };
        }

        let candidate_role = self.build_role(persona, recommendation, failure_report, all);
        if self.reflections.collides_with_contradiction(&candidate_role)? {
            return Ok(Some(MutationOutcome::Skipped(format!(
                "persona {} mutation aborted: role collides with an active contradiction",
                persona.name
            ))));
        }
        let sanitized_role = sanitize_role(&candidate_role);

        let mutation_type = if recommendation == Recommendation::OptimizeEfficiency {
            MutationType::PolicyUpdate
        } else {
            MutationType::RoleUpdate
        };

        let mut policies = persona.policies.clone();
        if recommendation == Recommendation::OptimizeEfficiency {
            for addition in ["timeout_reduction", "concise_output"] {
                if !policies.iter().any(|p| p == addition) {
                    policies.push(addition.to_string());
                }
            }
        }

        let previous_state = persona.current_state();
        let new_state = PersonaState {
            role: sanitized_role,
            policies,
            capabilities: persona.capabilities.clone(),
        };

        let baseline = VerificationBaseline {
            success_rate: self.metrics.stats_for_agent(METRIC_SUCCESS_RATE, &persona.name, DEFAULT_WINDOW)?.current,
            average_latency: self.metrics.stats_for_agent(METRIC_QUERY_LATENCY, &persona.name, DEFAULT_WINDOW)?.current,
        };

        let now = self.clock.now();
        let reason = recommendation.as_str().to_string();
        let mutation = PersonaMutation {
            id: Uuid::new_v4(),
            timestamp: now,
            kind: mutation_type,
            previous_state,
            new_state: new_state.clone(),
            reason: reason.clone(),
        };

        let persona_id = persona.id;
        self.personas.update(persona_id, move |current| {
            let mut p = current.ok_or_else(|| CortexError::not_found("Persona", persona_id.to_string()))?;
            p.apply_state(new_state.clone());
            p.metadata.push_mutation(mutation.clone());
            p.metadata.evolution_status = EvolutionStatus::Verifying;
            p.metadata.mutation_reason = Some(reason.clone());
            p.metadata.verification_started_at = Some(now);
            p.metadata.verification_baseline = Some(baseline.clone());
            p.updated_at = now;
            Ok(Some(p))
        })?;

        Ok(Some(MutationOutcome::Mutated(format!(
            "persona {} mutated: {}",
            persona.name,
            recommendation.as_str()
        ))))
    }

    /// Failure-pattern lessons first, then cross-pollination from a stable
    /// peer sharing the same recommendation, then a canonical role edit.
    fn build_role(
        &self,
        persona: &Persona,
        recommendation: Recommendation,
        failure_report: &[ToolFailureSummary],
        all: &[Persona],
    ) -> String {
        if !failure_report.is_empty() {
            let lessons: Vec<String> = failure_report
                .iter()
                .take(3)
                .map(|f| format!("avoid relying on {} ({}/{} recent calls failed)", f.tool_name, f.failure_count, f.total_count))
                .collect();
            return format!("{} Lessons: {}.", persona.role, lessons.join("; "));
        }
        if let Some(peer) = all.iter().find(|p| {
            p.id != persona.id
                && p.metadata.evolution_status == EvolutionStatus::Stable
                && p.metadata.mutation_reason.as_deref() == Some(recommendation.as_str())
        }) {
            return peer.role.clone();
        }
        match recommendation {
            Recommendation::OptimizeAccuracy => format!("{} Prioritize accuracy: verify claims before responding.", persona.role),
            Recommendation::OptimizeEfficiency => format!("{} Minimize latency: prefer concise, direct responses.", persona.role),
            _ => persona.role.clone(),
        }
    }
}

/// Truncates to 500 chars and strips control characters and templated
/// delimiters (`{{`, `}}`, `${`).
fn sanitize_role(role: &str) -> String {
    let without_controls: String = role.chars().filter(|c| !c.is_control()).collect();
    let without_templates = without_controls.replace("{{", "").replace("}}", "").replace("${", "");
    without_templates.chars().take(ROLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::capability::CapabilityRegistry;
    use cortex_core::clock::FixedClock;
    use cortex_core::model::{EvolutionStatus, Persona, PersonaMetadata};
    use cortex_core::store::SledStore;
    use chrono::Utc;

    fn planner() -> (StrategicPlanner, Arc<PersonaStore>, Arc<MetricsLedger>, Arc<dyn Clock>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let personas = Arc::new(PersonaStore::new(store.clone(), clock.clone(), "agent_personas"));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let actions = Arc::new(ActionJournal::new(store.clone(), clock.clone(), "agent_actions"));
        let reflections = Arc::new(ReflectionLog::new(store.clone(), clock.clone(), "agent_reflections", "agent_goals"));
        let rules = Arc::new(RuleEngine::new(store.clone(), clock.clone(), "agent_rules"));
        let capabilities = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), "agent_capabilities"));
        let mut probe_registry = LogicProbeRegistry::new(store.clone(), clock.clone(), "agent_logic_probes");
        probe_registry.register(Arc::new(crate::probe::MutationHistoryCapProbe::new(personas.clone())));
        probe_registry.register(Arc::new(crate::probe::SingleAlphaPerLineageProbe::new(capabilities)));
        let probes = Arc::new(probe_registry);
        let planner = StrategicPlanner::new(
            personas.clone(),
            metrics.clone(),
            actions,
            reflections,
            rules,
            probes,
            clock.clone(),
            EvolutionConfig::default(),
            StrategyConfig::default(),
        );
        (planner, personas, metrics, clock)
    }

    fn seed_persona(personas: &PersonaStore, name: &str) -> Persona {
        let now = Utc::now();
        let persona = Persona {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role: "a helpful analyst".into(),
            capabilities: vec![],
            policies: vec![],
            metadata: PersonaMetadata::default(),
            created_at: now,
            updated_at: now,
        };
        personas.put(&persona).unwrap();
        persona
    }

    #[test]
    fn empty_store_mutates_nothing() {
        let (planner, _, _, _) = planner();
        let outcomes = planner.mutate_strategy().unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn a_verifying_persona_with_strong_success_stabilizes() {
        let (planner, personas, metrics, _) = planner();
        let mut persona = seed_persona(&personas, "analyst");
        persona.metadata.evolution_status = EvolutionStatus::Verifying;
        persona.metadata.mutation_reason = Some("optimize_accuracy".into());
        persona.metadata.verification_baseline = Some(VerificationBaseline {
            success_rate: 0.70,
            average_latency: 100.0,
        });
        personas.put(&persona).unwrap();

        for v in [0.78, 0.81, 0.76, 0.83, 0.79, 0.80, 0.84, 0.77, 0.82, 0.80, 0.79, 0.81, 0.83, 0.78, 0.80, 0.82, 0.79, 0.81, 0.80, 0.82] {
            metrics
                .record(METRIC_SUCCESS_RATE, v, None, Some("analyst".into()), None, Default::default())
                .unwrap();
        }

        let outcomes = planner.mutate_strategy().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], MutationOutcome::Stabilized(msg) if msg.contains("analyst")));
        let reloaded = personas.get(persona.id).unwrap().unwrap();
        assert_eq!(reloaded.metadata.evolution_status, EvolutionStatus::Stable);
    }

    #[test]
    fn a_verifying_persona_with_collapsed_success_rolls_back() {
        let (planner, personas, metrics, _) = planner();
        let mut persona = seed_persona(&personas, "analyst");
        persona.role = "bold analyst".into();
        persona.metadata.evolution_status = EvolutionStatus::Verifying;
        persona.metadata.mutation_reason = Some("optimize_accuracy".into());
        persona.metadata.verification_baseline = Some(VerificationBaseline {
            success_rate: 0.70,
            average_latency: 100.0,
        });
        persona.metadata.push_mutation(PersonaMutation {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: MutationType::RoleUpdate,
            previous_state: PersonaState {
                role: "cautious analyst".into(),
                policies: vec![],
                capabilities: vec![],
            },
            new_state: persona.current_state(),
            reason: "optimize_accuracy".into(),
        });
        personas.put(&persona).unwrap();

        for v in [0.30, 0.55, 0.40, 0.60, 0.35, 0.50, 0.45, 0.38, 0.52, 0.41, 0.48, 0.33] {
            metrics
                .record(METRIC_SUCCESS_RATE, v, None, Some("analyst".into()), None, Default::default())
                .unwrap();
        }

        let outcomes = planner.mutate_strategy().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], MutationOutcome::RolledBack(name) if name == "analyst"));
        let reloaded = personas.get(persona.id).unwrap().unwrap();
        assert_eq!(reloaded.role, "cautious analyst");
        assert_eq!(reloaded.metadata.evolution_status, EvolutionStatus::Stable);
    }

    #[test]
    fn a_lagging_persona_is_mutated_into_verifying() {
        let (planner, personas, metrics, _) = planner();
        let lagging = seed_persona(&personas, "lagging");
        let _peer = seed_persona(&personas, "peer");

        for _ in 0..10 {
            metrics
                .record(METRIC_SUCCESS_RATE, 0.85, None, Some("peer".into()), None, Default::default())
                .unwrap();
        }
        for _ in 0..3 {
            metrics
                .record(METRIC_SUCCESS_RATE, 0.0, None, Some("lagging".into()), None, Default::default())
                .unwrap();
        }

        let outcomes = planner.mutate_strategy().unwrap();
        assert!(outcomes.iter().any(|o| matches!(o, MutationOutcome::Mutated(msg) if msg.contains("lagging"))));
        let reloaded = personas.get(lagging.id).unwrap().unwrap();
        assert_eq!(reloaded.metadata.evolution_status, EvolutionStatus::Verifying);
        assert_eq!(reloaded.metadata.mutation_history.len(), 1);
    }

    #[test]
    fn sanitize_role_strips_control_chars_templates_and_truncates() {
        let dirty = format!("role with {{{{template}}}} and ${{var}} and\u{0007}control{}", "x".repeat(600));
        let clean = sanitize_role(&dirty);
        assert!(!clean.contains("{{"));
        assert!(!clean.contains("${"));
        assert!(clean.len() <= ROLE_MAX_CHARS);
    }
}
