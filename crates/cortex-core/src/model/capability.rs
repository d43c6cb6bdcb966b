//! Capability / Skill.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    Sandbox,
    Experimental,
    Verified,
    Blacklisted,
}

impl CapabilityStatus {
    /// Status transitions form a DAG: `sandbox -> experimental -> verified`,
    /// and any status can transition to `blacklisted`.
    pub fn can_transition_to(self, next: CapabilityStatus) -> bool {
        use CapabilityStatus::*;
        match next {
            Blacklisted => true,
            Experimental => matches!(self, Sandbox | Experimental),
            Verified => matches!(self, Experimental | Verified),
            Sandbox => matches!(self, Sandbox),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    /// The ancestor this skill was mutated from; `lineage == name` for an original.
    pub lineage: String,
    #[serde(default)]
    pub is_alpha: bool,
    #[serde(default)]
    pub is_shadow: bool,
    #[serde(default)]
    pub usages: u64,
    #[serde(default)]
    pub anchored_reliability: Option<f64>,
    #[serde(default)]
    pub broadcasted: bool,
    #[serde(default)]
    pub broadcasted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hive_blacklisted: bool,
    #[serde(default)]
    pub mutated_from: Option<String>,
    /// Set once the Skill Synthesizer has pre-warmed this skill's description
    /// ahead of promotion, so a later pass doesn't re-refine it every cycle.
    #[serde(default)]
    pub prewarmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: String,
    pub status: CapabilityStatus,
    pub reliability: f64,
    #[serde(default)]
    pub metadata: CapabilityMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
