//! Governance Auditor.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::capability::CapabilityRegistry;
use crate::clock::Clock;
use crate::error::CortexResult;
use crate::journal::reflection::SYSTEM_SESSION_ID;
use crate::journal::{MetricsLedger, ReflectionLog};
use crate::model::{
    CapabilityStatus, EvolutionStatus, PolicyType, Ritual, RitualFrequency, RitualMetadata, RitualStatus, RitualType, ReflectionOutcome,
};
use crate::persona::PersonaStore;
use crate::store::SledStore;

use super::policy_enforcer::PolicyEnforcer;

const FALLBACK_HOURLY_BUDGET: f64 = 1.0;
const FALLBACK_MIN_SUCCESS_RATE: f64 = 0.5;
const PERSONA_QUARANTINE_SUCCESS_FLOOR: f64 = 0.3;
const PERSONA_QUARANTINE_BUDGET_MULTIPLIER: f64 = 1.5;
/// EmergenceAuditor's rate-spike factor: flag a metric whose last-10-minute
/// rate exceeds `k` times the preceding hour's rate.
const EMERGENCE_SPIKE_FACTOR: f64 = 3.0;
/// Reliability collapse threshold for a previously-verified skill (SkillAuditor).
const SKILL_COLLAPSE_THRESHOLD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub enum AuditIssueKind {
    BudgetExceeded,
    PerformanceDegraded,
    PersonaQuarantined,
    SkillBlacklisted,
    EmergenceSpike,
}

#[derive(Debug, Clone)]
pub struct AuditIssue {
    pub kind: AuditIssueKind,
    pub detail: String,
}

pub struct GovernanceAuditor {
    metrics: Arc<MetricsLedger>,
    policies: Arc<PolicyEnforcer>,
    personas: Arc<PersonaStore>,
    capabilities: Arc<CapabilityRegistry>,
    reflections: Arc<ReflectionLog>,
    clock: Arc<dyn Clock>,
    remediation: RemediationEngine,
}

impl GovernanceAuditor {
    pub fn new(
        metrics: Arc<MetricsLedger>,
        policies: Arc<PolicyEnforcer>,
        personas: Arc<PersonaStore>,
        capabilities: Arc<CapabilityRegistry>,
        reflections: Arc<ReflectionLog>,
        clock: Arc<dyn Clock>,
        rituals_store: Arc<SledStore>,
        rituals_table: impl Into<String>,
    ) -> Self {
        let remediation = RemediationEngine::new(rituals_store, clock.clone(), rituals_table);
        Self {
            metrics,
            policies,
            personas,
            capabilities,
            reflections,
            clock,
            remediation,
        }
    }

    /// Runs every independent auditor against a shared `now`; on any issue,
    /// records a `failure` reflection and hands the issues to the
    /// `RemediationEngine`.
    #[tracing::instrument(skip(self), target = "cortex::governance")]
    pub fn perform_audit(&self) -> CortexResult<Vec<AuditIssue>> {
        let now = self.clock.now();
        let mut issues = Vec::new();
        issues.extend(self.audit_budget(now)?);
        issues.extend(self.audit_performance(now)?);
        issues.extend(self.audit_personas(now)?);
        issues.extend(self.audit_skills()?);
        issues.extend(self.audit_emergence()?);

        if !issues.is_empty() {
            let summary = issues.iter().map(|i| i.detail.clone()).collect::<Vec<_>>().join("; ");
            self.reflections.reflect(
                SYSTEM_SESSION_ID,
                ReflectionOutcome::Failure,
                format!("governance audit raised {} issue(s): {summary}", issues.len()),
                None,
                BTreeMap::new(),
            )?;
            self.remediation.schedule_for(&issues)?;
            tracing::warn!(target: "cortex::governance", count = issues.len(), "audit raised issues");
        }
        Ok(issues)
    }

    fn budget_limit(&self) -> CortexResult<f64> {
        Ok(self
            .policies
            .get_by_name("budget")?
            .and_then(|p| p.definition.budget_limit.or(p.definition.max))
            .unwrap_or(FALLBACK_HOURLY_BUDGET))
    }

    fn min_success_rate(&self) -> CortexResult<f64> {
        Ok(self
            .policies
            .get_by_name("min_success_rate")?
            .and_then(|p| p.definition.min)
            .unwrap_or(FALLBACK_MIN_SUCCESS_RATE))
    }

    fn audit_budget(&self, now: chrono::DateTime<Utc>) -> CortexResult<Vec<AuditIssue>> {
        let since = now - chrono::Duration::hours(1);
        let spent = self.metrics.sum_since("total_cost", since)?;
        let limit = self.budget_limit()?;
        if spent > limit {
            return Ok(vec![AuditIssue {
                kind: AuditIssueKind::BudgetExceeded,
                detail: format!("hourly cost {spent:.4} exceeds budget {limit:.4}"),
            }]);
        }
        Ok(Vec::new())
    }

    fn audit_performance(&self, now: chrono::DateTime<Utc>) -> CortexResult<Vec<AuditIssue>> {
        let since = now - chrono::Duration::hours(1);
        let Some(avg) = self.metrics.average_since("success_rate", since)? else {
            return Ok(Vec::new());
        };
        let floor = self.min_success_rate()?;
        if avg < floor {
            return Ok(vec![AuditIssue {
                kind: AuditIssueKind::PerformanceDegraded,
                detail: format!("average success rate {avg:.4} below minimum {floor:.4}"),
            }]);
        }
        Ok(Vec::new())
    }

    /// Examines every persona currently under verification; quarantines
    /// (rolls back) ones whose success has collapsed or whose cost has blown
    /// through `1.5x` the budget.
    fn audit_personas(&self, now: chrono::DateTime<Utc>) -> CortexResult<Vec<AuditIssue>> {
        let since = now - chrono::Duration::hours(1);
        let limit = self.budget_limit()? * PERSONA_QUARANTINE_BUDGET_MULTIPLIER;
        let mut issues = Vec::new();
        for persona in self.personas.all()? {
            if persona.metadata.evolution_status != EvolutionStatus::Verifying {
                continue;
            }
            let success = self.metrics.average_since("success_rate", since)?.unwrap_or(1.0);
            let cost = self.metrics.sum_since("total_cost", since)?;
            if success < PERSONA_QUARANTINE_SUCCESS_FLOOR || cost > limit {
                self.personas.rollback(persona.id, "governance audit quarantine")?;
                issues.push(AuditIssue {
                    kind: AuditIssueKind::PersonaQuarantined,
                    detail: format!("persona {} quarantined (success={success:.2}, cost={cost:.2})", persona.name),
                });
            }
        }
        Ok(issues)
    }

    /// Blacklists any `verified` skill whose reliability has collapsed below
    /// `SKILL_COLLAPSE_THRESHOLD` post-promotion.
    fn audit_skills(&self) -> CortexResult<Vec<AuditIssue>> {
        let mut issues = Vec::new();
        for capability in self.capabilities.all()? {
            if capability.status == CapabilityStatus::Verified && capability.reliability < SKILL_COLLAPSE_THRESHOLD {
                self.capabilities.transition_status(capability.id, CapabilityStatus::Blacklisted)?;
                issues.push(AuditIssue {
                    kind: AuditIssueKind::SkillBlacklisted,
                    detail: format!("skill {} blacklisted (reliability={:.2})", capability.name, capability.reliability),
                });
            }
        }
        Ok(issues)
    }

    /// Flags any metric whose last-10-minute rate exceeds `EMERGENCE_SPIKE_FACTOR`
    /// times the preceding hour's rate.
    fn audit_emergence(&self) -> CortexResult<Vec<AuditIssue>> {
        let mut issues = Vec::new();
        for name in self.metrics.known_metric_names()? {
            let recent_rate = self.metrics.rate_over_minutes(&name, 10)?;
            let baseline_rate = self.metrics.rate_over_minutes(&name, 60)?;
            if baseline_rate > 0.0 && recent_rate > EMERGENCE_SPIKE_FACTOR * baseline_rate {
                issues.push(AuditIssue {
                    kind: AuditIssueKind::EmergenceSpike,
                    detail: format!("metric {name} spiking: recent rate {recent_rate:.4} vs baseline {baseline_rate:.4}"),
                });
            }
        }
        Ok(issues)
    }

    /// Diagnostic-only listing of structural recommendations: metrics flagged
    /// as slow queries suggest missing indexes; low-reliability sandbox/shadow
    /// skills suggest cold-storage archival.
    pub fn suggest_repairs(&self) -> CortexResult<Vec<String>> {
        let mut recommendations = Vec::new();
        for name in self.metrics.known_metric_names()? {
            if name.starts_with("slow_query_") {
                let table = name.trim_start_matches("slow_query_");
                recommendations.push(format!("consider an identity index on `{table}` (slow-query metric observed)"));
            }
        }
        for capability in self.capabilities.all()? {
            if capability.status != CapabilityStatus::Verified && capability.reliability < 0.1 && capability.metadata.usages == 0 {
                recommendations.push(format!("capability `{}` is a cold-storage candidate (unused, low reliability)", capability.name));
            }
        }
        Ok(recommendations)
    }
}

/// Turns audit issues into scheduled high-priority hourly rituals.
pub struct RemediationEngine {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl RemediationEngine {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
        }
    }

    #[tracing::instrument(skip(self, issues), target = "cortex::governance")]
    pub fn schedule_for(&self, issues: &[AuditIssue]) -> CortexResult<usize> {
        let mut scheduled = 0;
        for issue in issues {
            let Some((name, kind)) = remediation_ritual(&issue.kind) else {
                continue;
            };
            self.schedule(name, kind)?;
            scheduled += 1;
        }
        Ok(scheduled)
    }

    fn schedule(&self, name: &str, kind: RitualType) -> CortexResult<Ritual> {
        let now = self.clock.now();
        let id = self.store.next_id("rituals")?;
        let mut metadata = RitualMetadata::default();
        metadata.extra.insert("priority".into(), serde_json::json!("high"));
        metadata.extra.insert("triggered_by".into(), serde_json::json!("governance_audit"));
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
        self.store.put(&self.table, &id.to_string(), &ritual)?;
        Ok(ritual)
    }
}

fn remediation_ritual(kind: &AuditIssueKind) -> Option<(&'static str, RitualType)> {
    match kind {
        AuditIssueKind::BudgetExceeded => Some(("Emergency Compression", RitualType::Compression)),
        AuditIssueKind::PerformanceDegraded => Some(("Emergency Pruning", RitualType::Pruning)),
        AuditIssueKind::PersonaQuarantined | AuditIssueKind::SkillBlacklisted | AuditIssueKind::EmergenceSpike => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{Persona, PersonaMetadata};
    use std::collections::BTreeMap as StdBTreeMap;
    use uuid::Uuid;

    fn build() -> (GovernanceAuditor, Arc<MetricsLedger>, Arc<PersonaStore>, Arc<dyn Clock>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let policies = Arc::new(PolicyEnforcer::new(store.clone(), clock.clone(), metrics.clone(), "agent_policies", 60));
        let personas = Arc::new(PersonaStore::new(store.clone(), clock.clone(), "agent_personas"));
        let capabilities = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), "agent_capabilities"));
        let reflections = Arc::new(ReflectionLog::new(store.clone(), clock.clone(), "agent_reflections", "agent_goals"));
        let auditor = GovernanceAuditor::new(
            metrics.clone(),
            policies,
            personas.clone(),
            capabilities,
            reflections,
            clock.clone(),
            store,
            "agent_rituals",
        );
        (auditor, metrics, personas, clock)
    }

    #[test]
    fn budget_overrun_raises_issue_and_schedules_compression() {
        let (auditor, metrics, _personas, _clock) = build();
        metrics.record("total_cost", 5.0, None, None, None, StdBTreeMap::new()).unwrap();
        let issues = auditor.perform_audit().unwrap();
        assert!(issues.iter().any(|i| i.kind == AuditIssueKind::BudgetExceeded));
    }

    #[test]
    fn verifying_persona_with_collapsed_success_is_quarantined() {
        let (auditor, metrics, personas, clock) = build();
        metrics.record("success_rate", 0.1, None, None, None, StdBTreeMap::new()).unwrap();
        let now = clock.now();
        let mut metadata = PersonaMetadata::default();
        metadata.evolution_status = EvolutionStatus::Verifying;
        metadata.mutation_history.push(crate::model::PersonaMutation {
            id: Uuid::new_v4(),
            timestamp: now,
            kind: crate::model::MutationType::RoleUpdate,
            previous_state: crate::model::PersonaState::default(),
            new_state: crate::model::PersonaState::default(),
            reason: "optimize_accuracy".into(),
        });
        let persona = Persona {
            id: Uuid::new_v4(),
            name: "candidate".into(),
            role: "role".into(),
            capabilities: vec![],
            policies: vec![],
            metadata,
            created_at: now,
            updated_at: now,
        };
        personas.put(&persona).unwrap();

        let issues = auditor.perform_audit().unwrap();
        assert!(issues.iter().any(|i| i.kind == AuditIssueKind::PersonaQuarantined));
        let refreshed = personas.get(persona.id).unwrap().unwrap();
        assert_eq!(refreshed.metadata.evolution_status, EvolutionStatus::Stable);
    }
}
