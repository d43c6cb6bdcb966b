//! Rule + condition grammar.
//!
//! The condition grammar `"<key> <op> <value>"` is parsed at `defineRule`
//! time into a typed `Predicate`, rejecting malformed conditions as
//! `InvalidInput` immediately instead of at evaluation time.

use crate::error::{CortexError, CortexResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperation {
    Insert,
    Update,
    Delete,
    Select,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
    Audit,
    Mask,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredicateOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Includes,
}

impl PredicateOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            "includes" => Some(Self::Includes),
            _ => None,
        }
    }
}

/// A parsed `"<key> <op> <value>"` condition, evaluated against a JSON object.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub key: String,
    pub op: PredicateOp,
    pub literal: serde_json::Value,
    source: String,
}

impl Predicate {
    /// Parses a condition string, auto-coercing numeric and boolean literals.
    /// Rejects malformed conditions immediately.
    pub fn parse(condition: &str) -> CortexResult<Self> {
        let trimmed = condition.trim();
        let mut parts = trimmed.splitn(3, ' ');
        let key = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CortexError::InvalidInput(format!("empty condition: {condition:?}")))?;
        let op_str = parts
            .next()
            .ok_or_else(|| CortexError::InvalidInput(format!("missing operator: {condition:?}")))?;
        let value_str = parts
            .next()
            .ok_or_else(|| CortexError::InvalidInput(format!("missing value: {condition:?}")))?;
        let op = PredicateOp::parse(op_str)
            .ok_or_else(|| CortexError::InvalidInput(format!("unknown operator {op_str:?} in {condition:?}")))?;
        let literal = coerce_literal(value_str.trim());
        Ok(Self {
            key: key.to_string(),
            op,
            literal,
            source: condition.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates this predicate against a JSON object of field values.
    pub fn evaluate(&self, data: &serde_json::Value) -> bool {
        let Some(field) = data.get(&self.key) else {
            return false;
        };
        match self.op {
            PredicateOp::Eq => field == &self.literal,
            PredicateOp::Ne => field != &self.literal,
            PredicateOp::Gt => match (field.as_f64(), self.literal.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            PredicateOp::Lt => match (field.as_f64(), self.literal.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            PredicateOp::Includes => match (field.as_array(), self.literal.as_str()) {
                (Some(arr), Some(needle)) => arr.iter().any(|v| v.as_str() == Some(needle)),
                _ => match field.as_str() {
                    Some(s) => self.literal.as_str().map(|n| s.contains(n)).unwrap_or(false),
                    None => false,
                },
            },
        }
    }
}

fn coerce_literal(raw: &str) -> serde_json::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return serde_json::Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return serde_json::Value::Number(num);
        }
    }
    let unquoted = raw.trim_matches('"').trim_matches('\'');
    serde_json::Value::String(unquoted.to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default)]
    pub target_tool: Option<String>,
    #[serde(default)]
    pub mask_fields: Vec<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub table_name: String,
    pub operation: RuleOperation,
    #[serde(default)]
    pub condition: Option<String>,
    pub action: RuleAction,
    pub priority: i32,
    pub is_enabled: bool,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub metadata: RuleMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RuleDecision {
    pub action: RuleAction,
    pub rule_id: Option<i64>,
    pub reason: String,
}

impl RuleDecision {
    pub fn default_allow() -> Self {
        Self {
            action: RuleAction::Allow,
            rule_id: None,
            reason: "no matching rule; default allow".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_gt_condition() {
        let p = Predicate::parse("latency > 500").unwrap();
        assert!(p.evaluate(&serde_json::json!({"latency": 600})));
        assert!(!p.evaluate(&serde_json::json!({"latency": 400})));
    }

    #[test]
    fn parses_includes_condition_against_tags_array() {
        let p = Predicate::parse("tags includes billing").unwrap();
        assert!(p.evaluate(&serde_json::json!({"tags": ["billing", "x"]})));
        assert!(!p.evaluate(&serde_json::json!({"tags": ["x"]})));
    }

    #[test]
    fn rejects_malformed_condition() {
        assert!(Predicate::parse("latency").is_err());
        assert!(Predicate::parse("latency ~~ 5").is_err());
    }

    #[test]
    fn coerces_boolean_literal() {
        let p = Predicate::parse("enabled == true").unwrap();
        assert!(p.evaluate(&serde_json::json!({"enabled": true})));
    }
}
