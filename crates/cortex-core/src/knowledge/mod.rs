//! Knowledge Graph and Ablation Engine.

pub mod ablation;
pub mod similarity;

pub use ablation::AblationEngine;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::journal::MetricsLedger;
use crate::model::{
    KnowledgeItem, KnowledgeLink, KnowledgeMetadata, KnowledgeSource, KnowledgeStatus,
    REL_MENTIONS, REL_SEMANTICALLY_RELATED,
};
use crate::store::SledStore;

/// Candidate pool size for `autoLink`'s semantic-relatedness scan.
const AUTO_LINK_SCAN_LIMIT: usize = 50;
const AUTO_LINK_MIN_CONFIDENCE: f64 = 0.4;
const AUTO_LINK_JACCARD_THRESHOLD: f64 = 0.75;
const CONSOLIDATION_SIMILARITY_THRESHOLD: f64 = 0.85;

pub struct KnowledgeGraph {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsLedger>,
    items_table: String,
    links_table: String,
}

impl KnowledgeGraph {
    pub fn new(
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsLedger>,
        items_table: impl Into<String>,
        links_table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            items_table: items_table.into(),
            links_table: links_table.into(),
        }
    }

    fn all_items(&self) -> CortexResult<Vec<KnowledgeItem>> {
        Ok(self
            .store
            .scan::<KnowledgeItem>(&self.items_table)?
            .into_iter()
            .map(|(_, i)| i)
            .collect())
    }

    fn find_by_entity_fact(&self, entity: &str, fact: &str) -> CortexResult<Option<KnowledgeItem>> {
        Ok(self
            .all_items()?
            .into_iter()
            .find(|i| i.entity == entity && i.fact == fact))
    }

    /// Transactional upsert.
    #[tracing::instrument(skip(self, tags, metadata), target = "cortex::knowledge")]
    pub fn distill(
        &self,
        entity: &str,
        fact: &str,
        confidence: f64,
        session: Option<Uuid>,
        tags: std::collections::HashSet<String>,
        metadata: KnowledgeMetadata,
        source: KnowledgeSource,
    ) -> CortexResult<KnowledgeItem> {
        if let Some(mut existing) = self.find_by_entity_fact(entity, fact)? {
            existing.tags.extend(tags);
            if let Some(session) = session {
                existing.metadata.sessions.insert(session);
            }
            existing.metadata.session_count = existing.metadata.sessions.len() as u32;
            let bump = if source == KnowledgeSource::User { 0.2 } else { 0.05 };
            existing.confidence = (existing.confidence + bump).min(1.0);
            existing.metadata.hit_count = existing.metadata.hit_count.max(metadata.hit_count);
            existing.apply_confidence_cap();
            existing.recompute_status();
            existing.updated_at = self.clock.now();
            self.store.put(&self.items_table, &existing.id.to_string(), &existing)?;
            tracing::info!(target: "cortex::knowledge", entity, fact, confidence = existing.confidence, "distill merged existing item");
            return Ok(existing);
        }

        self.challenge_knowledge(entity, fact, confidence)?;

        let now = self.clock.now();
        let mut sessions = std::collections::BTreeSet::new();
        if let Some(session) = session {
            sessions.insert(session);
        }
        let session_count = sessions.len() as u32;
        let initial_status = if source == KnowledgeSource::User && confidence >= 0.8 {
            KnowledgeStatus::Verified
        } else {
            KnowledgeStatus::Proposed
        };
        let mut item = KnowledgeItem {
            id: Uuid::new_v4(),
            entity: entity.to_string(),
            fact: fact.to_string(),
            confidence,
            status: initial_status,
            source_session_id: session,
            tags,
            metadata: KnowledgeMetadata {
                source: Some(source),
                sessions,
                session_count,
                ..metadata
            },
            embedding: None,
            created_at: now,
            updated_at: now,
        };
        item.apply_confidence_cap();
        item.recompute_status();
        self.store.put(&self.items_table, &item.id.to_string(), &item)?;
        self.auto_link(&item)?;
        tracing::info!(target: "cortex::knowledge", entity, fact, id = %item.id, "distilled new item");
        Ok(item)
    }

    /// Increments confidence by `delta`, re-applies the cap, and recomputes
    /// status.
    pub fn verify_knowledge(&self, id: Uuid, delta: f64) -> CortexResult<KnowledgeItem> {
        self.store
            .update(&self.items_table, &id.to_string(), |current: Option<KnowledgeItem>| {
                let mut item = current.ok_or_else(|| CortexError::not_found("KnowledgeItem", id.to_string()))?;
                item.confidence = (item.confidence + delta).clamp(0.0, 1.0);
                item.apply_confidence_cap();
                item.recompute_status();
                item.updated_at = self.clock.now();
                Ok(Some(item))
            })?
            .ok_or_else(|| CortexError::not_found("KnowledgeItem", id.to_string()))
    }

    /// Penalizes rival items sharing the same entity with a different fact.
    #[tracing::instrument(skip(self), target = "cortex::knowledge")]
    pub fn challenge_knowledge(&self, entity: &str, new_fact: &str, conf: f64) -> CortexResult<()> {
        let rivals: Vec<KnowledgeItem> = self
            .all_items()?
            .into_iter()
            .filter(|i| i.entity == entity && i.fact != new_fact)
            .collect();
        for mut rival in rivals {
            if conf > 0.8 && rival.confidence > 0.7 {
                rival.status = KnowledgeStatus::Disputed;
                rival.confidence = (rival.confidence - 0.1).max(0.0);
            } else if rival.confidence <= 0.7 {
                rival.status = KnowledgeStatus::Deprecated;
                rival.confidence = (rival.confidence - 0.4).max(0.0);
            } else {
                continue;
            }
            rival.updated_at = self.clock.now();
            self.store.put(&self.items_table, &rival.id.to_string(), &rival)?;
            tracing::info!(target: "cortex::knowledge", rival_id = %rival.id, status = ?rival.status, "challenge degraded rival");
        }
        Ok(())
    }

    /// Returns items for `entity` sorted by descending confidence, optionally
    /// filtered to items carrying every tag in `filter_tags`. Side effect:
    /// records a retrieval hit per returned item.
    #[tracing::instrument(skip(self, filter_tags), target = "cortex::knowledge")]
    pub fn get_knowledge_by_entity(
        &self,
        entity: &str,
        filter_tags: Option<&[String]>,
    ) -> CortexResult<Vec<KnowledgeItem>> {
        let mut items: Vec<KnowledgeItem> = self
            .all_items()?
            .into_iter()
            .filter(|i| i.entity == entity)
            .filter(|i| match filter_tags {
                Some(tags) => tags.iter().all(|t| i.tags.contains(t)),
                None => true,
            })
            .collect();
        items.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        for item in &items {
            self.record_hit(item)?;
        }
        Ok(items)
    }

    fn record_hit(&self, item: &KnowledgeItem) -> CortexResult<()> {
        let now = self.clock.now();
        self.store
            .update(&self.items_table, &item.id.to_string(), |current: Option<KnowledgeItem>| {
                let Some(mut current) = current else { return Ok(None) };
                current.metadata.hit_count += 1;
                current.metadata.last_retrieved_at = Some(now);
                Ok(Some(current))
            })?;
        self.metrics.record(
            &format!("entity_hit_{}", item.entity),
            1.0,
            None,
            None,
            None,
            std::collections::BTreeMap::new(),
        )?;
        Ok(())
    }

    /// Idempotent on `(source,target,relationship)`.
    pub fn link_knowledge(
        &self,
        source_id: Uuid,
        target_id: Uuid,
        relationship: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> CortexResult<Option<KnowledgeLink>> {
        if source_id == target_id {
            return Err(CortexError::InvalidInput("a knowledge item cannot link to itself".into()));
        }
        let existing = self
            .store
            .scan::<KnowledgeLink>(&self.links_table)?
            .into_iter()
            .any(|(_, l)| l.source_id == source_id && l.target_id == target_id && l.relationship == relationship);
        if existing {
            return Ok(None);
        }
        let link = KnowledgeLink {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            relationship: relationship.to_string(),
            metadata,
            created_at: self.clock.now(),
        };
        self.store.put(&self.links_table, &link.id.to_string(), &link)?;
        Ok(Some(link))
    }

    /// Extracts entity tokens from `item.fact`, links `mentions` to items with
    /// a matching entity, then scans up to `AUTO_LINK_SCAN_LIMIT`
    /// most-recently-updated items with `confidence > 0.4`, linking
    /// `semantically_related` above the Jaccard threshold.
    #[tracing::instrument(skip(self, item), target = "cortex::knowledge")]
    pub fn auto_link(&self, item: &KnowledgeItem) -> CortexResult<()> {
        let tokens = similarity::extract_entity_tokens(&item.fact);
        let all = self.all_items()?;
        for token in &tokens {
            for candidate in all.iter().filter(|c| c.id != item.id && c.entity == *token) {
                self.link_knowledge(item.id, candidate.id, REL_MENTIONS, Default::default())?;
            }
        }

        let mut candidates: Vec<&KnowledgeItem> = all
            .iter()
            .filter(|c| c.id != item.id && c.confidence > AUTO_LINK_MIN_CONFIDENCE)
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.updated_at));
        for candidate in candidates.into_iter().take(AUTO_LINK_SCAN_LIMIT) {
            let sim = similarity::jaccard_similarity(&item.fact, &candidate.fact);
            if sim > AUTO_LINK_JACCARD_THRESHOLD {
                self.link_knowledge(item.id, candidate.id, REL_SEMANTICALLY_RELATED, Default::default())?;
            }
        }
        Ok(())
    }

    /// Pairwise-merges facts with similarity > 0.85 within each entity bucket,
    /// keeping the higher-confidence item and deleting the other.
    pub fn consolidate_knowledge(&self) -> CortexResult<usize> {
        let all = self.all_items()?;
        let mut by_entity: std::collections::HashMap<String, Vec<KnowledgeItem>> = std::collections::HashMap::new();
        for item in all {
            by_entity.entry(item.entity.clone()).or_default().push(item);
        }

        let mut merged_count = 0;
        for (_, mut bucket) in by_entity {
            bucket.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
            let mut kept: Vec<KnowledgeItem> = Vec::new();
            'bucket: for candidate in bucket {
                for keeper in kept.iter_mut() {
                    if similarity::jaccard_similarity(&keeper.fact, &candidate.fact) > CONSOLIDATION_SIMILARITY_THRESHOLD {
                        keeper.tags.extend(candidate.tags.clone());
                        keeper.metadata.sessions.extend(candidate.metadata.sessions.clone());
                        keeper.metadata.session_count = keeper.metadata.sessions.len() as u32;
                        keeper.updated_at = self.clock.now();
                        self.store.put(&self.items_table, &keeper.id.to_string(), keeper)?;
                        self.store.delete(&self.items_table, &candidate.id.to_string())?;
                        merged_count += 1;
                        continue 'bucket;
                    }
                }
                kept.push(candidate);
            }
        }
        Ok(merged_count)
    }

    /// Deletes items below `threshold` confidence.
    pub fn prune_low_confidence(&self, threshold: f64) -> CortexResult<usize> {
        let mut pruned = 0;
        for item in self.all_items()? {
            if item.confidence < threshold {
                self.store.delete(&self.items_table, &item.id.to_string())?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// `0.4*confidence + 0.4*min(1, hits/ageDays) + 0.2*(source==user?1:0.7)`.
    pub fn calculate_fitness(&self, item: &KnowledgeItem) -> f64 {
        let now = self.clock.now();
        self.calculate_fitness_at(item, now)
    }

    fn calculate_fitness_at(&self, item: &KnowledgeItem, now: DateTime<Utc>) -> f64 {
        let age_days = (now - item.created_at).num_seconds() as f64 / 86_400.0;
        let recency_term = (item.metadata.hit_count as f64 / age_days.max(1.0)).min(1.0);
        let source_term = if item.metadata.source == Some(KnowledgeSource::User) { 1.0 } else { 0.7 };
        0.4 * item.confidence + 0.4 * recency_term + 0.2 * source_term
    }

    /// Curiosity: scans active goal descriptions for entity-like tokens
    /// (the same extractor `autoLink` uses) that have no corresponding
    /// knowledge entity, so a caller can schedule distillation for them.
    /// Capped at `AUTO_LINK_SCAN_LIMIT` results to match the rest of the
    /// knowledge graph's backpressure discipline.
    pub fn detect_knowledge_gaps(&self, goals: &[crate::model::Goal]) -> CortexResult<Vec<String>> {
        let known_entities: std::collections::HashSet<String> =
            self.all_items()?.into_iter().map(|item| item.entity).collect();

        let mut gaps: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for goal in goals {
            if matches!(goal.status, crate::model::GoalStatus::Completed | crate::model::GoalStatus::Failed) {
                continue;
            }
            for token in similarity::extract_entity_tokens(&goal.description) {
                if !known_entities.contains(&token) && seen.insert(token.clone()) {
                    gaps.push(token);
                }
            }
            if gaps.len() >= AUTO_LINK_SCAN_LIMIT {
                break;
            }
        }
        gaps.truncate(AUTO_LINK_SCAN_LIMIT);
        Ok(gaps)
    }

    pub(crate) fn items_table(&self) -> &str {
        &self.items_table
    }

    pub(crate) fn links_table(&self) -> &str {
        &self.links_table
    }

    pub(crate) fn store(&self) -> &Arc<SledStore> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
