//! Policy + PolicyDefinition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Budget,
    Safety,
    Privacy,
    Performance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    Daily,
    Hourly,
    All,
}

/// Encodes thresholds, regex patterns, or a cumulative-budget spec. A definition may combine a numeric threshold and a budget, and may
/// additionally `depends_on` other policies for composite evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDefinition {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub must_match: Option<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
    #[serde(default)]
    pub budget_metric_name: Option<String>,
    #[serde(default)]
    pub budget_period: Option<BudgetPeriod>,
    #[serde(default)]
    pub budget_limit: Option<f64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PolicyType,
    pub definition: PolicyDefinition,
    pub is_enabled: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
