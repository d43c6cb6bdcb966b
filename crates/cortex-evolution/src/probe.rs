//! Logic Probes.
//!
//! A logic probe is a named invariant check run before every Strategic
//! Planner cycle; if any registered probe fails the whole cycle aborts and
//! `mutateStrategy` returns empty. Probes are registered in-process as trait
//! objects rather than hot-loaded via `libloading` — invariant checks are
//! part of the evolution kernel itself, not swappable skills; dynamic
//! loading is reserved for the Skill Synthesizer's sandboxed capabilities,
//! which `cortex-core` already models without a compiled-artifact step. Each
//! run's pass/fail status is persisted under row-lock discipline
//! (`SledStore::update`'s CAS loop) so a concurrent cycle observes a
//! consistent view of `agent_logic_probes`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cortex_core::clock::Clock;
use cortex_core::error::CortexResult;
use cortex_core::model::{CapabilityStatus, MUTATION_HISTORY_CAP};
use cortex_core::store::SledStore;
use cortex_core::{capability::CapabilityRegistry, persona::PersonaStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Passing,
    Failing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicProbeRecord {
    pub name: String,
    pub status: ProbeStatus,
    pub last_run: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// A registered invariant check. `check` is pure and side-effect free;
/// `LogicProbeRegistry` owns all persistence.
pub trait LogicProbeCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self) -> Result<(), String>;
}

/// Invariant 2: `mutationHistory.length <= 5` for every persona.
pub struct MutationHistoryCapProbe {
    personas: Arc<PersonaStore>,
}

impl MutationHistoryCapProbe {
    pub fn new(personas: Arc<PersonaStore>) -> Self {
        Self { personas }
    }
}

impl LogicProbeCheck for MutationHistoryCapProbe {
    fn name(&self) -> &str {
        "persona_mutation_history_cap"
    }

    fn check(&self) -> Result<(), String> {
        let personas = self.personas.all().map_err(|e| e.to_string())?;
        for persona in personas {
            if persona.metadata.mutation_history.len() > MUTATION_HISTORY_CAP {
                return Err(format!(
                    "persona {} carries {} mutations, cap is {}",
                    persona.id,
                    persona.metadata.mutation_history.len(),
                    MUTATION_HISTORY_CAP
                ));
            }
        }
        Ok(())
    }
}

/// Invariant 3: for every skill lineage with at least one
/// `verified` member, exactly one member has `metadata.is_alpha = true`.
pub struct SingleAlphaPerLineageProbe {
    capabilities: Arc<CapabilityRegistry>,
}

impl SingleAlphaPerLineageProbe {
    pub fn new(capabilities: Arc<CapabilityRegistry>) -> Self {
        Self { capabilities }
    }
}

impl LogicProbeCheck for SingleAlphaPerLineageProbe {
    fn name(&self) -> &str {
        "single_alpha_per_lineage"
    }

    fn check(&self) -> Result<(), String> {
        let all = self.capabilities.all().map_err(|e| e.to_string())?;
        let mut lineages: std::collections::HashSet<String> = std::collections::HashSet::new();
        for capability in &all {
            lineages.insert(capability.metadata.lineage.clone());
        }
        for lineage in lineages {
            let members = self.capabilities.list_by_lineage(&lineage).map_err(|e| e.to_string())?;
            let has_verified = members.iter().any(|c| c.status == CapabilityStatus::Verified);
            if !has_verified {
                continue;
            }
            let alphas = members.iter().filter(|c| c.metadata.is_alpha).count();
            if alphas != 1 {
                return Err(format!("lineage {lineage} has a verified member but {alphas} alphas"));
            }
        }
        Ok(())
    }
}

pub struct LogicProbeRegistry {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
    probes: Vec<Arc<dyn LogicProbeCheck>>,
}

impl LogicProbeRegistry {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
            probes: Vec::new(),
        }
    }

    pub fn register(&mut self, probe: Arc<dyn LogicProbeCheck>) {
        self.probes.push(probe);
    }

    /// Runs every registered probe, persists each result under a row lock
    /// keyed by probe name, and returns whether all passed.
    #[tracing::instrument(skip(self), target = "cortex::evolution::probe")]
    pub fn run_all(&self) -> CortexResult<bool> {
        let mut all_passed = true;
        for probe in &self.probes {
            let outcome = probe.check();
            let passed = outcome.is_ok();
            all_passed &= passed;
            let now = self.clock.now();
            let name = probe.name().to_string();
            let error = outcome.err();
            self.store
                .update(&self.table, &name.clone(), move |_current: Option<LogicProbeRecord>| {
                    Ok(Some(LogicProbeRecord {
                        name: name.clone(),
                        status: if passed { ProbeStatus::Passing } else { ProbeStatus::Failing },
                        last_run: now,
                        last_error: error.clone(),
                    }))
                })?;
            if !passed {
                tracing::warn!(target: "cortex::evolution::probe", probe = probe.name(), "logic probe failed");
            }
        }
        Ok(all_passed)
    }

    pub fn statuses(&self) -> CortexResult<Vec<LogicProbeRecord>> {
        Ok(self.store.scan::<LogicProbeRecord>(&self.table)?.into_iter().map(|(_, r)| r).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::clock::FixedClock;
    use cortex_core::model::{Capability, CapabilityMetadata};
    use uuid::Uuid;

    fn registry() -> (LogicProbeRegistry, Arc<CapabilityRegistry>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let capabilities = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), "agent_capabilities"));
        let registry = LogicProbeRegistry::new(store, clock, "agent_logic_probes");
        (registry, capabilities)
    }

    #[test]
    fn all_probes_pass_on_an_empty_store() {
        let (mut registry, capabilities) = registry();
        registry.register(Arc::new(SingleAlphaPerLineageProbe::new(capabilities)));
        assert!(registry.run_all().unwrap());
        let statuses = registry.statuses().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, ProbeStatus::Passing);
    }

    #[test]
    fn lineage_with_two_alphas_fails_the_probe() {
        let (mut registry, capabilities) = registry();
        let now = Utc::now();
        for is_alpha in [true, true] {
            capabilities
                .put(&Capability {
                    id: Uuid::new_v4(),
                    name: format!("skill-{is_alpha}-{}", Uuid::new_v4()),
                    version: "1.0.0".into(),
                    description: "d".into(),
                    status: CapabilityStatus::Verified,
                    reliability: 0.9,
                    metadata: CapabilityMetadata {
                        lineage: "lineX".into(),
                        is_alpha,
                        ..Default::default()
                    },
                    created_at: now,
                    updated_at: now,
                })
                .unwrap();
        }
        registry.register(Arc::new(SingleAlphaPerLineageProbe::new(capabilities)));
        assert!(!registry.run_all().unwrap());
        let statuses = registry.statuses().unwrap();
        assert_eq!(statuses[0].status, ProbeStatus::Failing);
    }
}
