//! Action Journal entry: one recorded tool invocation, success or failure,
//! backing the failure-report queries the Strategic Planner and Skill
//! Synthesizer both read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-tool failure summary.
#[derive(Debug, Clone)]
pub struct ToolFailureSummary {
    pub tool_name: String,
    pub failure_count: usize,
    pub total_count: usize,
    pub failures: Vec<Action>,
}

impl ToolFailureSummary {
    pub fn failure_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_count as f64
        }
    }
}
