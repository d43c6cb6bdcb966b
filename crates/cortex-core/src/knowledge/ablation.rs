//! Ablation Engine.

use std::sync::Arc;

use uuid::Uuid;

use super::KnowledgeGraph;
use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::journal::{MetricsLedger, ReflectionLog};
use crate::model::{KnowledgeItem, Memory, ReflectionOutcome, METRIC_SUCCESS_RATE};
use crate::store::SledStore;

/// Per-pass caps bounding memory use.
const ZOMBIE_ITEM_PAGE: usize = 500;
const ZOMBIE_MEMORY_PAGE: usize = 1000;
const FITNESS_PRUNE_THRESHOLD: f64 = 0.3;
const RECOVERY_BATCH: usize = 5;
const RECENT_WINDOW: usize = 10;
const DEGRADATION_RATIO: f64 = 0.8;
const MIN_SAMPLE_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum AblationHealth {
    Stable,
    Degraded { recovered_count: usize },
}

pub struct AblationEngine {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    knowledge: Arc<KnowledgeGraph>,
    reflections: Arc<ReflectionLog>,
    metrics: Arc<MetricsLedger>,
    memories_table: String,
}

impl AblationEngine {
    pub fn new(
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        knowledge: Arc<KnowledgeGraph>,
        reflections: Arc<ReflectionLog>,
        metrics: Arc<MetricsLedger>,
        memories_table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            knowledge,
            reflections,
            metrics,
            memories_table: memories_table.into(),
        }
    }

    /// Prunes low-fitness "zombie" knowledge and unanchored stale memories,
    /// paginated to bound memory use.
    #[tracing::instrument(skip(self), target = "cortex::ablation")]
    pub fn prune_zombies(&self, threshold_days: i64) -> CortexResult<(usize, usize)> {
        let cutoff = self.clock.now() - chrono::Duration::days(threshold_days);

        let links: Vec<(Uuid, Uuid)> = self
            .store
            .scan::<crate::model::KnowledgeLink>(self.knowledge.links_table())?
            .into_iter()
            .map(|(_, l)| (l.source_id, l.target_id))
            .collect();
        let referenced: std::collections::HashSet<Uuid> = links
            .into_iter()
            .flat_map(|(a, b)| [a, b])
            .collect();

        let mut candidates: Vec<KnowledgeItem> = self
            .store
            .scan::<KnowledgeItem>(self.knowledge.items_table())?
            .into_iter()
            .map(|(_, i)| i)
            .filter(|i| i.updated_at < cutoff)
            .filter(|i| i.metadata.priority.as_deref() != Some("high"))
            .filter(|i| !referenced.contains(&i.id))
            .collect();
        candidates.truncate(ZOMBIE_ITEM_PAGE);

        let mut items_pruned = 0;
        for item in &candidates {
            if self.knowledge.calculate_fitness(item) < FITNESS_PRUNE_THRESHOLD {
                self.store.delete(self.knowledge.items_table(), &item.id.to_string())?;
                items_pruned += 1;
            }
        }

        let mut stale_memories: Vec<(String, Memory)> = self
            .store
            .scan::<Memory>(&self.memories_table)?
            .into_iter()
            .filter(|(_, m)| m.created_at < cutoff && !m.metadata.anchor)
            .collect();
        stale_memories.truncate(ZOMBIE_MEMORY_PAGE);
        for (id, _) in &stale_memories {
            self.store.delete(&self.memories_table, id)?;
        }

        tracing::info!(
            target: "cortex::ablation",
            items_pruned,
            memories_pruned = stale_memories.len(),
            "pruned zombies"
        );
        Ok((items_pruned, stale_memories.len()))
    }

    /// Snapshots confidence into `metadata.original_confidence`, zeroes it,
    /// marks `ablation_test=true`, and records a reflection.
    #[tracing::instrument(skip(self), target = "cortex::ablation")]
    pub fn test_ablation(&self, id: Uuid) -> CortexResult<KnowledgeItem> {
        let now = self.clock.now();
        let updated = self
            .store
            .update(self.knowledge.items_table(), &id.to_string(), |current: Option<KnowledgeItem>| {
                let mut item = current.ok_or_else(|| CortexError::not_found("KnowledgeItem", id.to_string()))?;
                item.metadata.original_confidence = Some(item.confidence);
                item.metadata.ablation_test = true;
                item.confidence = 0.0;
                item.updated_at = now;
                Ok(Some(item))
            })?
            .ok_or_else(|| CortexError::not_found("KnowledgeItem", id.to_string()))?;

        self.reflections.reflect(
            crate::journal::reflection::SYSTEM_SESSION_ID,
            ReflectionOutcome::Partial,
            format!("ablation test started on knowledge item {id}"),
            None,
            std::collections::BTreeMap::new(),
        )?;
        Ok(updated)
    }

    /// Restores the pre-ablation confidence and strips ablation metadata.
    pub fn recover_ablated_item(&self, id: Uuid) -> CortexResult<KnowledgeItem> {
        let now = self.clock.now();
        self.store
            .update(self.knowledge.items_table(), &id.to_string(), |current: Option<KnowledgeItem>| {
                let mut item = current.ok_or_else(|| CortexError::not_found("KnowledgeItem", id.to_string()))?;
                if let Some(original) = item.metadata.original_confidence.take() {
                    item.confidence = original;
                }
                item.metadata.ablation_test = false;
                item.updated_at = now;
                Ok(Some(item))
            })?
            .ok_or_else(|| CortexError::not_found("KnowledgeItem", id.to_string()))
    }

    /// Compares the recent success-rate window against the overall baseline;
    /// if degraded beyond `DEGRADATION_RATIO` with enough samples, recovers
    /// up to `RECOVERY_BATCH` ablated items ordered by descending historical
    /// `hit_count`.
    #[tracing::instrument(skip(self), target = "cortex::ablation")]
    pub fn monitor_ablation_performance(&self) -> CortexResult<AblationHealth> {
        let recent = self.metrics.stats(METRIC_SUCCESS_RATE, RECENT_WINDOW)?;
        let overall = self.metrics.stats_default_window(METRIC_SUCCESS_RATE)?;

        if overall.count <= MIN_SAMPLE_COUNT || recent.mean >= overall.mean * DEGRADATION_RATIO {
            return Ok(AblationHealth::Stable);
        }

        let mut ablated: Vec<KnowledgeItem> = self
            .store
            .scan::<KnowledgeItem>(self.knowledge.items_table())?
            .into_iter()
            .map(|(_, i)| i)
            .filter(|i| i.metadata.ablation_test)
            .collect();
        ablated.sort_by_key(|i| std::cmp::Reverse(i.metadata.hit_count));

        let mut recovered = 0;
        for item in ablated.into_iter().take(RECOVERY_BATCH) {
            self.recover_ablated_item(item.id)?;
            recovered += 1;
        }
        tracing::warn!(target: "cortex::ablation", recovered, "ablation monitor recovered items after degradation");
        Ok(AblationHealth::Degraded { recovered_count: recovered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{KnowledgeMetadata, KnowledgeSource};
    use chrono::Utc;

    fn engine() -> (AblationEngine, Arc<KnowledgeGraph>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let knowledge = Arc::new(KnowledgeGraph::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            "agent_knowledge_base",
            "agent_knowledge_links",
        ));
        let reflections = Arc::new(ReflectionLog::new(
            store.clone(),
            clock.clone(),
            "agent_reflections",
            "agent_goals",
        ));
        let ablation = AblationEngine::new(store, clock, knowledge.clone(), reflections, metrics, "agent_memories");
        (ablation, knowledge)
    }

    #[test]
    fn test_ablation_then_recover_round_trips_confidence() {
        let (ablation, knowledge) = engine();
        let item = knowledge
            .distill(
                "Zeta",
                "fact",
                0.77,
                None,
                Default::default(),
                KnowledgeMetadata::default(),
                KnowledgeSource::Assistant,
            )
            .unwrap();
        ablation.test_ablation(item.id).unwrap();
        let ablated: KnowledgeItem = ablation
            .store
            .get(knowledge.items_table(), &item.id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(ablated.confidence, 0.0);
        assert!(ablated.metadata.ablation_test);

        let recovered = ablation.recover_ablated_item(item.id).unwrap();
        assert!((recovered.confidence - 0.77).abs() < 1e-9);
        assert!(!recovered.metadata.ablation_test);
    }
}
