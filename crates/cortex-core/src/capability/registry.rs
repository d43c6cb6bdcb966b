//! CapabilityRegistry.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::model::{Capability, CapabilityMetadata, CapabilityStatus};
use crate::store::SledStore;

pub struct CapabilityRegistry {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl CapabilityRegistry {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
        }
    }

    pub fn all(&self) -> CortexResult<Vec<Capability>> {
        Ok(self.store.scan::<Capability>(&self.table)?.into_iter().map(|(_, c)| c).collect())
    }

    pub fn get_by_name(&self, name: &str) -> CortexResult<Option<Capability>> {
        Ok(self.all()?.into_iter().find(|c| c.name == name))
    }

    pub fn get(&self, id: Uuid) -> CortexResult<Option<Capability>> {
        self.store.get(&self.table, &id.to_string())
    }

    pub fn list_by_lineage(&self, lineage: &str) -> CortexResult<Vec<Capability>> {
        Ok(self.all()?.into_iter().filter(|c| c.metadata.lineage == lineage).collect())
    }

    /// Upserts by `name`; `lineage = mutatedFrom ?? name`.
    #[tracing::instrument(skip(self, description), target = "cortex::capability")]
    pub fn register_capability(
        &self,
        name: &str,
        version: &str,
        description: &str,
        initial_status: CapabilityStatus,
        mutated_from: Option<String>,
    ) -> CortexResult<Capability> {
        let now = self.clock.now();
        if let Some(mut existing) = self.get_by_name(name)? {
            existing.version = version.to_string();
            existing.description = description.to_string();
            existing.status = initial_status;
            existing.updated_at = now;
            self.store.put(&self.table, &existing.id.to_string(), &existing)?;
            return Ok(existing);
        }
        let lineage = mutated_from.clone().unwrap_or_else(|| name.to_string());
        let capability = Capability {
            id: Uuid::new_v4(),
            name: name.to_string(),
            version: version.to_string(),
            description: description.to_string(),
            status: initial_status,
            reliability: 0.0,
            metadata: CapabilityMetadata {
                lineage,
                mutated_from,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        };
        self.store.put(&self.table, &capability.id.to_string(), &capability)?;
        tracing::info!(target: "cortex::capability", name, ?initial_status, "capability registered");
        Ok(capability)
    }

    /// Enforces the status DAG: `sandbox -> experimental -> verified`, any -> `blacklisted`.
    #[tracing::instrument(skip(self), target = "cortex::capability")]
    pub fn transition_status(&self, id: Uuid, next: CapabilityStatus) -> CortexResult<Capability> {
        let now = self.clock.now();
        self.store
            .update(&self.table, &id.to_string(), move |current: Option<Capability>| {
                let mut capability = current.ok_or_else(|| CortexError::not_found("Capability", id.to_string()))?;
                if !capability.status.can_transition_to(next) {
                    return Err(CortexError::InvalidInput(format!(
                        "capability {id} cannot transition {:?} -> {next:?}",
                        capability.status
                    )));
                }
                capability.status = next;
                capability.updated_at = now;
                Ok(Some(capability))
            })?
            .ok_or_else(|| CortexError::not_found("Capability", id.to_string()))
    }

    pub fn update_reliability(&self, id: Uuid, reliability: f64) -> CortexResult<Capability> {
        let now = self.clock.now();
        self.store
            .update(&self.table, &id.to_string(), move |current: Option<Capability>| {
                let mut capability = current.ok_or_else(|| CortexError::not_found("Capability", id.to_string()))?;
                capability.reliability = reliability.clamp(0.0, 1.0);
                capability.updated_at = now;
                Ok(Some(capability))
            })?
            .ok_or_else(|| CortexError::not_found("Capability", id.to_string()))
    }

    /// Used by the Skill Synthesizer's pre-warm pass to write back an
    /// AI-refined description ahead of a status transition.
    pub fn update_description(&self, id: Uuid, description: &str) -> CortexResult<Capability> {
        let now = self.clock.now();
        let description = description.to_string();
        self.store
            .update(&self.table, &id.to_string(), move |current: Option<Capability>| {
                let mut capability = current.ok_or_else(|| CortexError::not_found("Capability", id.to_string()))?;
                capability.description = description.clone();
                capability.metadata.prewarmed = true;
                capability.updated_at = now;
                Ok(Some(capability))
            })?
            .ok_or_else(|| CortexError::not_found("Capability", id.to_string()))
    }

    pub fn increment_usage(&self, id: Uuid) -> CortexResult<Capability> {
        self.store
            .update(&self.table, &id.to_string(), |current: Option<Capability>| {
                let mut capability = current.ok_or_else(|| CortexError::not_found("Capability", id.to_string()))?;
                capability.metadata.usages += 1;
                Ok(Some(capability))
            })?
            .ok_or_else(|| CortexError::not_found("Capability", id.to_string()))
    }

    pub fn put(&self, capability: &Capability) -> CortexResult<()> {
        self.store.put(&self.table, &capability.id.to_string(), capability)
    }

    /// Prunes the bottom `fraction` of experimental skills by reliability.
    pub fn prune_bottom_experimental(&self, fraction: f64) -> CortexResult<usize> {
        let mut experimental: Vec<Capability> = self
            .all()?
            .into_iter()
            .filter(|c| c.status == CapabilityStatus::Experimental)
            .collect();
        experimental.sort_by(|a, b| a.reliability.partial_cmp(&b.reliability).unwrap_or(std::cmp::Ordering::Equal));
        let cut = ((experimental.len() as f64) * fraction).ceil() as usize;
        for capability in experimental.into_iter().take(cut) {
            self.store.delete(&self.table, &capability.id.to_string())?;
        }
        Ok(cut)
    }

    pub fn count_by_status(&self, status: CapabilityStatus) -> CortexResult<usize> {
        Ok(self.all()?.into_iter().filter(|c| c.status == status).count())
    }

    /// Read-modify-write a capability row via CAS; used by the Hive
    /// Broadcaster's row-locked Sovereign Draft updates.
    pub(crate) fn store_mutate(&self, id: Uuid, f: impl Fn(&mut Capability)) -> CortexResult<Capability> {
        self.store
            .update(&self.table, &id.to_string(), move |current: Option<Capability>| {
                let mut capability = current.ok_or_else(|| CortexError::not_found("Capability", id.to_string()))?;
                f(&mut capability);
                Ok(Some(capability))
            })?
            .ok_or_else(|| CortexError::not_found("Capability", id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Utc;

    fn registry() -> CapabilityRegistry {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        CapabilityRegistry::new(store, clock, "agent_capabilities")
    }

    #[test]
    fn transition_dag_rejects_skipping_verified_from_sandbox() {
        let registry = registry();
        let cap = registry
            .register_capability("tool.search", "1.0.0", "desc", CapabilityStatus::Sandbox, None)
            .unwrap();
        let result = registry.transition_status(cap.id, CapabilityStatus::Verified);
        assert!(result.is_err());
    }

    #[test]
    fn blacklist_is_reachable_from_any_status() {
        let registry = registry();
        let cap = registry
            .register_capability("tool.search", "1.0.0", "desc", CapabilityStatus::Verified, None)
            .unwrap();
        let result = registry.transition_status(cap.id, CapabilityStatus::Blacklisted).unwrap();
        assert_eq!(result.status, CapabilityStatus::Blacklisted);
    }
}
