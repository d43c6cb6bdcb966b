//! Persona storage and rollback.
//!
//! Rollback restores `role`/`policies`/`capabilities` from the tail of
//! `mutationHistory` — pure data manipulation, so it lives here rather than
//! in `cortex-evolution`'s Strategic Planner, letting the Governance
//! Auditor's `PersonaAuditor` quarantine a persona without a back-pointer
//! into the evolution crate.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::model::{EvolutionStatus, LastFailedMutation, Persona};
use crate::store::SledStore;

pub struct PersonaStore {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl PersonaStore {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
        }
    }

    pub fn get(&self, id: Uuid) -> CortexResult<Option<Persona>> {
        self.store.get(&self.table, &id.to_string())
    }

    pub fn get_by_name(&self, name: &str) -> CortexResult<Option<Persona>> {
        Ok(self.all()?.into_iter().find(|p| p.name == name))
    }

    pub fn all(&self) -> CortexResult<Vec<Persona>> {
        Ok(self.store.scan::<Persona>(&self.table)?.into_iter().map(|(_, p)| p).collect())
    }

    pub fn put(&self, persona: &Persona) -> CortexResult<()> {
        self.store.put(&self.table, &persona.id.to_string(), persona)
    }

    pub fn update<F>(&self, id: Uuid, f: F) -> CortexResult<Persona>
    where
        F: FnMut(Option<Persona>) -> CortexResult<Option<Persona>>,
    {
        self.store
            .update(&self.table, &id.to_string(), f)?
            .ok_or_else(|| CortexError::not_found("Persona", id.to_string()))
    }

    /// Restores `role`/`policies`/`capabilities` to the tail `previousState`
    /// of `mutationHistory`, records the rollback timestamp, and clears
    /// `evolution_status` back to `stable`.
    #[tracing::instrument(skip(self), target = "cortex::persona")]
    pub fn rollback(&self, id: Uuid, reason: impl Into<String>) -> CortexResult<Persona> {
        let now = self.clock.now();
        let reason = reason.into();
        let persona = self.update(id, move |current| {
            let mut persona = current.ok_or_else(|| CortexError::not_found("Persona", id.to_string()))?;
            let Some(last_mutation) = persona.metadata.mutation_history.last().cloned() else {
                return Err(CortexError::Inconsistent(format!(
                    "persona {id} has no mutation history to roll back"
                )));
            };
            persona.apply_state(last_mutation.previous_state);
            persona.metadata.evolution_status = EvolutionStatus::Stable;
            persona.metadata.rollback_history.push(now);
            persona.metadata.last_failed_mutation = Some(LastFailedMutation {
                recommendation: persona.metadata.mutation_reason.clone().unwrap_or_default(),
                timestamp: now,
            });
            persona.metadata.mutation_reason = None;
            persona.metadata.verification_started_at = None;
            persona.metadata.verification_baseline = None;
            persona.updated_at = now;
            Ok(Some(persona))
        })?;
        tracing::warn!(target: "cortex::persona", persona_id = %id, reason, "persona rolled back");
        Ok(persona)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{MutationType, PersonaMetadata, PersonaMutation, PersonaState};

    fn store() -> PersonaStore {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        PersonaStore::new(store, clock, "agent_personas")
    }

    #[test]
    fn rollback_restores_previous_state() {
        let store = store();
        let now = Utc::now();
        let previous = PersonaState {
            role: "cautious analyst".into(),
            policies: vec!["p1".into()],
            capabilities: vec!["c1".into()],
        };
        let mutation = PersonaMutation {
            id: Uuid::new_v4(),
            timestamp: now,
            kind: MutationType::RoleUpdate,
            previous_state: previous.clone(),
            new_state: PersonaState {
                role: "bold analyst".into(),
                policies: vec!["p2".into()],
                capabilities: vec!["c2".into()],
            },
            reason: "optimize_accuracy".into(),
        };
        let mut metadata = PersonaMetadata::default();
        metadata.evolution_status = EvolutionStatus::Verifying;
        metadata.mutation_reason = Some("optimize_accuracy".into());
        metadata.push_mutation(mutation);
        let persona = Persona {
            id: Uuid::new_v4(),
            name: "p".into(),
            role: "bold analyst".into(),
            capabilities: vec!["c2".into()],
            policies: vec!["p2".into()],
            metadata,
            created_at: now,
            updated_at: now,
        };
        store.put(&persona).unwrap();

        let rolled_back = store.rollback(persona.id, "z-score breach").unwrap();
        assert_eq!(rolled_back.role, previous.role);
        assert_eq!(rolled_back.policies, previous.policies);
        assert_eq!(rolled_back.metadata.evolution_status, EvolutionStatus::Stable);
        assert_eq!(rolled_back.metadata.rollback_history.len(), 1);
        assert!(rolled_back.metadata.last_failed_mutation.is_some());
    }
}
