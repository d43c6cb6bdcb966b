//! Snapshot: schema-evolution checkpoints for rollback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(default)]
    pub ddl: Option<String>,
    #[serde(default)]
    pub is_auto: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub name: String,
    /// Opaque schema fingerprint ("DNA") this checkpoint captured.
    pub dna: String,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
    pub created_at: DateTime<Utc>,
}
