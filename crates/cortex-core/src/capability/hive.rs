//! HiveBroadcaster.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::CortexResult;
use crate::knowledge::KnowledgeGraph;
use crate::model::{Capability, CapabilityStatus, KnowledgeItem, KnowledgeSource, KnowledgeStatus};
use crate::store::SledStore;

use super::registry::CapabilityRegistry;

/// Bayesian-average shrinkage constant toward `PRIOR_RELIABILITY`.
const BAYESIAN_K: f64 = 5.0;
const PRIOR_RELIABILITY: f64 = 0.5;

fn bayesian_score(capability: &Capability) -> f64 {
    let usages = capability.metadata.usages as f64;
    (capability.reliability * usages + BAYESIAN_K * PRIOR_RELIABILITY) / (usages + BAYESIAN_K)
}

pub struct HiveBroadcaster {
    registry: Arc<CapabilityRegistry>,
    knowledge: Arc<KnowledgeGraph>,
    clock: Arc<dyn Clock>,
}

impl HiveBroadcaster {
    pub fn new(registry: Arc<CapabilityRegistry>, knowledge: Arc<KnowledgeGraph>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, knowledge, clock }
    }

    /// Sovereign Draft: within each lineage of `verified` capabilities, the
    /// highest Bayesian-score member becomes Alpha; the rest become Shadows
    /// demoted back to `experimental`. Blacklisted-but-unbroadcast capabilities
    /// are flagged in a single bulk pass.
    #[tracing::instrument(skip(self), target = "cortex::capability")]
    pub fn broadcast_skills(&self) -> CortexResult<Vec<String>> {
        let all = self.registry.all()?;
        let mut by_lineage: HashMap<String, Vec<Capability>> = HashMap::new();
        for cap in all.iter().filter(|c| c.status == CapabilityStatus::Verified) {
            by_lineage.entry(cap.metadata.lineage.clone()).or_default().push(cap.clone());
        }

        let mut alphas = Vec::new();
        for (_lineage, members) in by_lineage {
            if members.is_empty() {
                continue;
            }
            let alpha_id = members
                .iter()
                .max_by(|a, b| bayesian_score(a).partial_cmp(&bayesian_score(b)).unwrap_or(std::cmp::Ordering::Equal))
                .map(|c| c.id)
                .expect("non-empty members");

            let now = self.clock.now();
            for member in &members {
                if member.id == alpha_id {
                    self.registry.store_mutate(member.id, |c| {
                        c.metadata.is_alpha = true;
                        c.metadata.is_shadow = false;
                        c.metadata.broadcasted = true;
                        c.metadata.broadcasted_at = Some(now);
                        c.updated_at = now;
                    })?;
                    alphas.push(member.name.clone());
                } else {
                    self.registry.store_mutate(member.id, |c| {
                        c.metadata.is_alpha = false;
                        c.metadata.is_shadow = true;
                        c.status = CapabilityStatus::Experimental;
                        c.updated_at = now;
                    })?;
                }
            }
        }

        let now = self.clock.now();
        for cap in all.iter().filter(|c| c.status == CapabilityStatus::Blacklisted && !c.metadata.broadcasted) {
            self.registry.store_mutate(cap.id, |c| {
                c.metadata.broadcasted = true;
                c.metadata.hive_blacklisted = true;
                c.updated_at = now;
            })?;
        }

        Ok(alphas)
    }

    /// `confidence := min(1.0, confidence + boost)` for every item tagged
    /// `domain_tag` with `confidence < 1.0`.
    #[tracing::instrument(skip(self), target = "cortex::capability")]
    pub fn sync_domain(&self, domain_tag: &str, boost: f64) -> CortexResult<usize> {
        let store = self.knowledge.store();
        let items = store.scan::<KnowledgeItem>(self.knowledge.items_table())?;
        let mut updated = 0;
        for (key, mut item) in items {
            if item.tags.contains(domain_tag) && item.confidence < 1.0 {
                item.confidence = (item.confidence + boost).min(1.0);
                item.updated_at = self.clock.now();
                store.put(self.knowledge.items_table(), &key, &item)?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Promotes local high-confidence knowledge (non-null `source_session_id`)
    /// to global (session-less) entries. On conflict by `(entity, fact,
    /// source=null)`, reinforces the existing global confidence to
    /// `min(0.99, max(old, new) + 0.01)`. Each promotion is a single-row CAS
    /// transaction.
    #[tracing::instrument(skip(self), target = "cortex::capability")]
    pub fn broadcast_knowledge(&self, min_confidence: f64, limit: usize, offset: usize) -> CortexResult<usize> {
        let store = self.knowledge.store();
        let mut candidates: Vec<KnowledgeItem> = store
            .scan::<KnowledgeItem>(self.knowledge.items_table())?
            .into_iter()
            .map(|(_, i)| i)
            .filter(|i| i.source_session_id.is_some() && i.confidence >= min_confidence)
            .collect();
        candidates.sort_by_key(|i| i.id);
        let page: Vec<KnowledgeItem> = candidates.into_iter().skip(offset).take(limit).collect();

        let mut promoted = 0;
        for local in page {
            let existing_global = store
                .scan::<KnowledgeItem>(self.knowledge.items_table())?
                .into_iter()
                .map(|(_, i)| i)
                .find(|i| i.entity == local.entity && i.fact == local.fact && i.source_session_id.is_none());

            let now = self.clock.now();
            match existing_global {
                Some(global) => {
                    store.update(self.knowledge.items_table(), &global.id.to_string(), move |current: Option<KnowledgeItem>| {
                        let Some(mut current) = current else { return Ok(None) };
                        current.confidence = (current.confidence.max(local.confidence) + 0.01).min(0.99);
                        current.updated_at = now;
                        Ok(Some(current))
                    })?;
                }
                None => {
                    let mut global = local.clone();
                    global.id = Uuid::new_v4();
                    global.source_session_id = None;
                    global.metadata.source = Some(KnowledgeSource::System);
                    global.status = KnowledgeStatus::Proposed;
                    global.created_at = now;
                    global.updated_at = now;
                    store.put(self.knowledge.items_table(), &global.id.to_string(), &global)?;
                }
            }
            promoted += 1;
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::journal::MetricsLedger;

    fn setup() -> (HiveBroadcaster, Arc<CapabilityRegistry>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let registry = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), "agent_capabilities"));
        let knowledge = Arc::new(KnowledgeGraph::new(store, clock.clone(), metrics, "agent_knowledge_base", "agent_knowledge_links"));
        (HiveBroadcaster::new(registry.clone(), knowledge, clock), registry)
    }

    #[test]
    fn alpha_selection_prefers_higher_bayesian_score() {
        let (hive, registry) = setup();
        let a = registry.register_capability("skill.a", "1.0.0", "desc", CapabilityStatus::Sandbox, None).unwrap();
        registry.transition_status(a.id, CapabilityStatus::Experimental).unwrap();
        registry.transition_status(a.id, CapabilityStatus::Verified).unwrap();
        registry.update_reliability(a.id, 0.9).unwrap();
        for _ in 0..10 {
            registry.increment_usage(a.id).unwrap();
        }

        let b = registry
            .register_capability("skill.b", "1.0.0", "desc", CapabilityStatus::Sandbox, Some("skill.a".into()))
            .unwrap();
        registry.transition_status(b.id, CapabilityStatus::Experimental).unwrap();
        registry.transition_status(b.id, CapabilityStatus::Verified).unwrap();
        registry.update_reliability(b.id, 0.6).unwrap();
        for _ in 0..3 {
            registry.increment_usage(b.id).unwrap();
        }

        let alphas = hive.broadcast_skills().unwrap();
        assert_eq!(alphas, vec!["skill.a".to_string()]);

        let refreshed_a = registry.get_by_name("skill.a").unwrap().unwrap();
        assert!(refreshed_a.metadata.is_alpha);
        assert!(refreshed_a.metadata.broadcasted);

        let refreshed_b = registry.get_by_name("skill.b").unwrap().unwrap();
        assert!(refreshed_b.metadata.is_shadow);
        assert_eq!(refreshed_b.status, CapabilityStatus::Experimental);
    }
}
