//! RuleEngine.

use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::error::CortexResult;
use crate::model::{Predicate, Rule, RuleAction, RuleDecision, RuleMetadata, RuleOperation};
use crate::store::SledStore;

pub struct RuleEngine {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
    /// Predicates parsed once at `define_rule` time; keyed by rule id so
    /// `evaluate_rules` never re-parses a condition string.
    predicate_cache: DashMap<i64, Predicate>,
}

impl RuleEngine {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
            predicate_cache: DashMap::new(),
        }
    }

    /// Parses `condition` (if any) immediately, rejecting malformed conditions
    /// as `InvalidInput` rather than at evaluation time.
    #[tracing::instrument(skip(self, metadata), target = "cortex::governance")]
    pub fn define_rule(
        &self,
        table_name: &str,
        operation: RuleOperation,
        condition: Option<String>,
        action: RuleAction,
        priority: i32,
        metadata: RuleMetadata,
    ) -> CortexResult<Rule> {
        let predicate = condition.as_deref().map(Predicate::parse).transpose()?;
        let id = self.store.next_id("rules")?;
        let rule = Rule {
            id,
            table_name: table_name.to_string(),
            operation,
            condition,
            action,
            priority,
            is_enabled: true,
            script: None,
            metadata,
            created_at: self.clock.now(),
        };
        self.store.put(&self.table, &id.to_string(), &rule)?;
        if let Some(predicate) = predicate {
            self.predicate_cache.insert(id, predicate);
        }
        Ok(rule)
    }

    fn predicate_for(&self, rule: &Rule) -> CortexResult<Option<Predicate>> {
        let Some(condition) = &rule.condition else {
            return Ok(None);
        };
        if let Some(cached) = self.predicate_cache.get(&rule.id) {
            return Ok(Some(cached.clone()));
        }
        let predicate = Predicate::parse(condition)?;
        self.predicate_cache.insert(rule.id, predicate.clone());
        Ok(Some(predicate))
    }

    /// Selects enabled rules for `(table_name, operation | all)`, sorted by
    /// descending priority, returning the first match or `allow` by default.
    #[tracing::instrument(skip(self, data), target = "cortex::governance")]
    pub fn evaluate_rules(&self, table_name: &str, operation: RuleOperation, data: &serde_json::Value) -> CortexResult<RuleDecision> {
        let mut rules: Vec<Rule> = self
            .store
            .scan::<Rule>(&self.table)?
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_enabled && r.table_name == table_name && (r.operation == operation || r.operation == RuleOperation::All))
            .collect();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));

        for rule in rules {
            let matched = match self.predicate_for(&rule)? {
                Some(predicate) => predicate.evaluate(data),
                None => true,
            };
            if matched {
                tracing::info!(target: "cortex::governance", rule_id = rule.id, action = ?rule.action, "rule matched");
                return Ok(RuleDecision {
                    action: rule.action,
                    rule_id: Some(rule.id),
                    reason: format!("rule {} matched on {}.{:?}", rule.id, table_name, operation),
                });
            }
        }
        Ok(RuleDecision::default_allow())
    }

    /// Replaces fields listed in `metadata.maskFields` with `*****` when
    /// `action=mask`.
    pub fn apply_masking(&self, rule_id: i64, mut data: serde_json::Value) -> CortexResult<serde_json::Value> {
        let Some(rule) = self.store.get::<Rule>(&self.table, &rule_id.to_string())? else {
            return Ok(data);
        };
        if let serde_json::Value::Object(map) = &mut data {
            for field in &rule.metadata.mask_fields {
                if map.contains_key(field) {
                    map.insert(field.clone(), serde_json::Value::String("*****".to_string()));
                }
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Utc;

    fn engine() -> RuleEngine {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        RuleEngine::new(store, clock, "agent_rules")
    }

    #[test]
    fn no_enabled_rules_defaults_to_allow() {
        let engine = engine();
        let decision = engine
            .evaluate_rules("agent_actions", RuleOperation::Insert, &serde_json::json!({}))
            .unwrap();
        assert_eq!(decision.action, RuleAction::Allow);
        assert!(decision.rule_id.is_none());
    }

    #[test]
    fn deny_rule_wins_by_priority() {
        let engine = engine();
        engine
            .define_rule("agent_actions", RuleOperation::Insert, Some("latency > 500".into()), RuleAction::Deny, 10, RuleMetadata::default())
            .unwrap();
        let decision = engine
            .evaluate_rules("agent_actions", RuleOperation::Insert, &serde_json::json!({"latency": 600}))
            .unwrap();
        assert_eq!(decision.action, RuleAction::Deny);
    }

    #[test]
    fn masking_replaces_configured_fields() {
        let engine = engine();
        let rule = engine
            .define_rule(
                "agent_actions",
                RuleOperation::Select,
                None,
                RuleAction::Mask,
                0,
                RuleMetadata {
                    mask_fields: vec!["ssn".into()],
                    ..Default::default()
                },
            )
            .unwrap();
        let masked = engine.apply_masking(rule.id, serde_json::json!({"ssn": "123-45-6789"})).unwrap();
        assert_eq!(masked["ssn"], "*****");
    }
}
