//! PolicyEnforcer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use regex::Regex;

use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::journal::MetricsLedger;
use crate::model::{BudgetPeriod, Policy, PolicyType};
use crate::store::SledStore;

#[derive(Debug, Clone)]
pub enum PolicyValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct PolicyViolationDetail {
    pub policy_name: String,
    pub reason: String,
}

struct CachedBudget {
    total: f64,
    computed_at: Instant,
}

pub struct PolicyEnforcer {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsLedger>,
    table: String,
    cache_ttl: Duration,
    budget_cache: DashMap<(String, String), CachedBudget>,
}

impl PolicyEnforcer {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, metrics: Arc<MetricsLedger>, table: impl Into<String>, cache_ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            metrics,
            table: table.into(),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            budget_cache: DashMap::new(),
        }
    }

    pub fn get_by_name(&self, name: &str) -> CortexResult<Option<Policy>> {
        Ok(self.all()?.into_iter().find(|p| p.name == name))
    }

    fn all(&self) -> CortexResult<Vec<Policy>> {
        Ok(self.store.scan::<Policy>(&self.table)?.into_iter().map(|(_, p)| p).collect())
    }

    fn budget_total(&self, metric_name: &str, period: BudgetPeriod) -> CortexResult<f64> {
        let period_key = format!("{period:?}");
        let cache_key = (metric_name.to_string(), period_key);
        if let Some(cached) = self.budget_cache.get(&cache_key) {
            if cached.computed_at.elapsed() < self.cache_ttl {
                return Ok(cached.total);
            }
        }
        let now = self.clock.now();
        let since = match period {
            BudgetPeriod::Hourly => now - chrono::Duration::hours(1),
            BudgetPeriod::Daily => now - chrono::Duration::days(1),
            BudgetPeriod::All => chrono::DateTime::<chrono::Utc>::MIN_UTC,
        };
        let total = self.metrics.sum_since(metric_name, since)?;
        self.budget_cache.insert(
            cache_key,
            CachedBudget {
                total,
                computed_at: Instant::now(),
            },
        );
        Ok(total)
    }

    /// Numeric thresholds (`min`/`max`), regex patterns (`mustMatch`/`forbidden`),
    /// and a cumulative budget check.
    #[tracing::instrument(skip(self, value), target = "cortex::governance")]
    pub fn check_policy(&self, name: &str, value: &PolicyValue) -> CortexResult<()> {
        let Some(policy) = self.get_by_name(name)? else {
            return Ok(());
        };
        if !policy.is_enabled {
            return Ok(());
        }
        let def = &policy.definition;

        if let PolicyValue::Number(n) = value {
            if let Some(min) = def.min {
                if *n < min {
                    return Err(CortexError::PolicyViolation(format!("{name}: {n} below minimum {min}")));
                }
            }
            if let Some(max) = def.max {
                if *n > max {
                    return Err(CortexError::PolicyViolation(format!("{name}: {n} exceeds maximum {max}")));
                }
            }
        }

        if let PolicyValue::Text(text) = value {
            if let Some(pattern) = &def.must_match {
                let re = Regex::new(pattern).map_err(|e| CortexError::InvalidInput(format!("bad mustMatch regex for {name}: {e}")))?;
                if !re.is_match(text) {
                    return Err(CortexError::PolicyViolation(format!("{name}: value does not match required pattern")));
                }
            }
            for forbidden in &def.forbidden {
                let re = Regex::new(forbidden).map_err(|e| CortexError::InvalidInput(format!("bad forbidden regex for {name}: {e}")))?;
                if re.is_match(text) {
                    return Err(CortexError::PolicyViolation(format!("{name}: value matches forbidden pattern {forbidden}")));
                }
            }
        }

        if let (Some(metric_name), Some(limit)) = (&def.budget_metric_name, def.budget_limit) {
            let period = def.budget_period.unwrap_or(BudgetPeriod::All);
            let add = match value {
                PolicyValue::Number(n) => *n,
                PolicyValue::Text(_) => 0.0,
            };
            let total = self.budget_total(metric_name, period)?;
            if total + add > limit {
                return Err(CortexError::PolicyViolation(format!(
                    "{name}: cumulative budget {total:.4} + {add:.4} exceeds limit {limit:.4}"
                )));
            }
        }

        Ok(())
    }

    /// Evaluates every active policy whose name matches a context key, plus
    /// every `privacy` policy against `ctx["content"]`, recursing into
    /// `definition.dependsOn` policies.
    #[tracing::instrument(skip(self, ctx), target = "cortex::governance")]
    pub fn evaluate_context(&self, ctx: &serde_json::Map<String, serde_json::Value>) -> CortexResult<Vec<PolicyViolationDetail>> {
        let mut visited = HashSet::new();
        let mut violations = Vec::new();
        self.evaluate_context_inner(ctx, &mut visited, &mut violations)?;
        Ok(violations)
    }

    fn evaluate_context_inner(
        &self,
        ctx: &serde_json::Map<String, serde_json::Value>,
        visited: &mut HashSet<String>,
        violations: &mut Vec<PolicyViolationDetail>,
    ) -> CortexResult<()> {
        let policies = self.all()?;
        for policy in &policies {
            if !policy.is_enabled || visited.contains(&policy.name) {
                continue;
            }
            let matches_key = ctx.contains_key(&policy.name);
            let is_privacy = policy.kind == PolicyType::Privacy && ctx.contains_key("content");
            if !matches_key && !is_privacy {
                continue;
            }
            self.evaluate_policy_and_dependencies(policy, ctx, visited, violations)?;
        }
        Ok(())
    }

    /// Evaluates one policy against `ctx`, then walks `definition.dependsOn`
    /// by name: each dependency is looked up and evaluated directly against
    /// its own `ctx` value (falling back to the parent's `content` value for
    /// a privacy-typed dependency), rather than re-scanning the whole policy
    /// set under the outer loop's `ctx`-key filter -- a dependency that has
    /// no key of its own in `ctx` would otherwise never be checked.
    fn evaluate_policy_and_dependencies(
        &self,
        policy: &Policy,
        ctx: &serde_json::Map<String, serde_json::Value>,
        visited: &mut HashSet<String>,
        violations: &mut Vec<PolicyViolationDetail>,
    ) -> CortexResult<()> {
        if !policy.is_enabled || visited.contains(&policy.name) {
            return Ok(());
        }
        visited.insert(policy.name.clone());

        let is_privacy = policy.kind == PolicyType::Privacy && ctx.contains_key("content");
        let value = if is_privacy {
            policy_value_from(ctx.get("content"))
        } else {
            policy_value_from(ctx.get(&policy.name))
        };
        if let Err(CortexError::PolicyViolation(reason)) = self.check_policy(&policy.name, &value) {
            violations.push(PolicyViolationDetail {
                policy_name: policy.name.clone(),
                reason,
            });
        }

        for dependency in &policy.definition.depends_on {
            if visited.contains(dependency) {
                continue;
            }
            if let Some(dep_policy) = self.get_by_name(dependency)? {
                self.evaluate_policy_and_dependencies(&dep_policy, ctx, visited, violations)?;
            }
        }
        Ok(())
    }
}

fn policy_value_from(value: Option<&serde_json::Value>) -> PolicyValue {
    match value {
        Some(serde_json::Value::Number(n)) => PolicyValue::Number(n.as_f64().unwrap_or(0.0)),
        Some(serde_json::Value::String(s)) => PolicyValue::Text(s.clone()),
        Some(other) => PolicyValue::Text(other.to_string()),
        None => PolicyValue::Text(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::{PolicyDefinition};
    use chrono::Utc;

    fn enforcer() -> (PolicyEnforcer, Arc<SledStore>, Arc<dyn Clock>) {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let enforcer = PolicyEnforcer::new(store.clone(), clock.clone(), metrics, "agent_policies", 60);
        (enforcer, store, clock)
    }

    #[test]
    fn numeric_threshold_violation_is_reported() {
        let (enforcer, store, clock) = enforcer();
        let policy = Policy {
            id: 1,
            name: "latency_budget".into(),
            kind: PolicyType::Performance,
            definition: PolicyDefinition {
                max: Some(500.0),
                ..Default::default()
            },
            is_enabled: true,
            metadata: Default::default(),
            created_at: clock.now(),
        };
        store.put("agent_policies", &policy.id.to_string(), &policy).unwrap();
        let result = enforcer.check_policy("latency_budget", &PolicyValue::Number(900.0));
        assert!(matches!(result, Err(CortexError::PolicyViolation(_))));
    }

    #[test]
    fn unknown_policy_passes_through() {
        let (enforcer, _store, _clock) = enforcer();
        assert!(enforcer.check_policy("missing", &PolicyValue::Number(1.0)).is_ok());
    }

    #[test]
    fn depends_on_evaluates_a_policy_absent_from_the_context_keys() {
        let (enforcer, store, clock) = enforcer();
        let parent = Policy {
            id: 1,
            name: "parent_budget".into(),
            kind: PolicyType::Budget,
            definition: PolicyDefinition {
                max: Some(100.0),
                depends_on: vec!["hidden_dependency".into()],
                ..Default::default()
            },
            is_enabled: true,
            metadata: Default::default(),
            created_at: clock.now(),
        };
        // `hidden_dependency` has no key of its own in `ctx` -- it is only
        // reachable through `parent_budget`'s `dependsOn`, and it requires a
        // non-empty value, so an absent key (which resolves to an empty
        // string) only raises a violation if the dependency actually ran.
        let dependency = Policy {
            id: 2,
            name: "hidden_dependency".into(),
            kind: PolicyType::Budget,
            definition: PolicyDefinition {
                must_match: Some(".+".into()),
                ..Default::default()
            },
            is_enabled: true,
            metadata: Default::default(),
            created_at: clock.now(),
        };
        store.put("agent_policies", &parent.id.to_string(), &parent).unwrap();
        store.put("agent_policies", &dependency.id.to_string(), &dependency).unwrap();

        let mut ctx = serde_json::Map::new();
        ctx.insert("parent_budget".into(), serde_json::json!(50.0));
        let violations = enforcer.evaluate_context(&ctx).unwrap();
        assert!(violations.iter().any(|v| v.policy_name == "hidden_dependency"));
    }
}
