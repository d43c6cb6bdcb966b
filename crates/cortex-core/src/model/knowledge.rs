//! KnowledgeItem, KnowledgeLink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeStatus {
    Proposed,
    Verified,
    Disputed,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeMetadata {
    pub source: Option<KnowledgeSource>,
    #[serde(default)]
    pub sessions: BTreeSet<Uuid>,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub last_retrieved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ablation_test: bool,
    #[serde(default)]
    pub original_confidence: Option<f64>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub entity: String,
    pub fact: String,
    pub confidence: f64,
    pub status: KnowledgeStatus,
    #[serde(default)]
    pub source_session_id: Option<Uuid>,
    #[serde(default)]
    pub tags: HashSet<String>,
    #[serde(default)]
    pub metadata: KnowledgeMetadata,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Cap applied while unverified by population.
    pub const UNVERIFIED_CAP: f64 = 0.85;

    /// Recomputes `status` from the verification invariant:
    /// `status = verified` iff `source = user OR session_count >= 3 OR confidence >= 0.9`.
    pub fn recompute_status(&mut self) {
        let verified = self.metadata.source == Some(KnowledgeSource::User)
            || self.metadata.session_count >= 3
            || self.confidence >= 0.9;
        self.status = if verified {
            KnowledgeStatus::Verified
        } else if self.status == KnowledgeStatus::Verified {
            // was verified by one of the three conditions, none hold any more
            KnowledgeStatus::Proposed
        } else {
            self.status
        };
    }

    /// Applies the unverified confidence cap: 0.85 while `source != user AND session_count < 3`.
    pub fn apply_confidence_cap(&mut self) {
        let capped = self.metadata.source != Some(KnowledgeSource::User) && self.metadata.session_count < 3;
        if capped && self.confidence > Self::UNVERIFIED_CAP {
            self.confidence = Self::UNVERIFIED_CAP;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeLink {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relationship: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

pub const REL_MENTIONS: &str = "mentions";
pub const REL_SEMANTICALLY_RELATED: &str = "semantically_related";

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(confidence: f64, source: KnowledgeSource, session_count: u32) -> KnowledgeItem {
        let now = Utc::now();
        KnowledgeItem {
            id: Uuid::new_v4(),
            entity: "Alpha".into(),
            fact: "is_live".into(),
            confidence,
            status: KnowledgeStatus::Proposed,
            source_session_id: None,
            tags: HashSet::new(),
            metadata: KnowledgeMetadata {
                source: Some(source),
                session_count,
                ..Default::default()
            },
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unverified_non_user_item_is_capped() {
        let mut item = fresh(0.99, KnowledgeSource::Assistant, 1);
        item.apply_confidence_cap();
        assert_eq!(item.confidence, KnowledgeItem::UNVERIFIED_CAP);
    }

    #[test]
    fn user_sourced_item_is_never_capped() {
        let mut item = fresh(0.99, KnowledgeSource::User, 1);
        item.apply_confidence_cap();
        assert_eq!(item.confidence, 0.99);
    }

    #[test]
    fn status_recomputes_verified_on_session_count() {
        let mut item = fresh(0.5, KnowledgeSource::Assistant, 3);
        item.recompute_status();
        assert_eq!(item.status, KnowledgeStatus::Verified);
    }

    #[test]
    fn status_recomputes_proposed_when_no_condition_holds() {
        let mut item = fresh(0.5, KnowledgeSource::Assistant, 1);
        item.status = KnowledgeStatus::Verified;
        item.recompute_status();
        assert_eq!(item.status, KnowledgeStatus::Proposed);
    }
}
