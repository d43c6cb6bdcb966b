//! Action Journal & Refiner.

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::RefinerConfig;
use crate::error::CortexResult;
use crate::model::{Action, ToolFailureSummary};
use crate::store::SledStore;

pub struct ActionJournal {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl ActionJournal {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
        }
    }

    pub fn record(
        &self,
        session_id: Option<Uuid>,
        tool_name: &str,
        arguments: serde_json::Value,
        success: bool,
        error: Option<String>,
    ) -> CortexResult<Action> {
        let action = Action {
            id: Uuid::new_v4(),
            session_id,
            tool_name: tool_name.to_string(),
            arguments,
            success,
            error,
            created_at: self.clock.now(),
        };
        self.store.put(&self.table, &action.id.to_string(), &action)?;
        Ok(action)
    }

    /// Most recent `limit` actions, newest first.
    pub fn recent(&self, limit: usize) -> CortexResult<Vec<Action>> {
        let mut actions: Vec<Action> = self
            .store
            .scan::<Action>(&self.table)?
            .into_iter()
            .map(|(_, a)| a)
            .collect();
        actions.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        actions.truncate(limit);
        Ok(actions)
    }

    /// Most recent `limit` failed actions, newest first.
    pub fn recent_failures(&self, limit: usize) -> CortexResult<Vec<Action>> {
        let mut actions: Vec<Action> = self
            .store
            .scan::<Action>(&self.table)?
            .into_iter()
            .map(|(_, a)| a)
            .filter(|a| !a.success)
            .collect();
        actions.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        actions.truncate(limit);
        Ok(actions)
    }

    /// Tool names with more than one failure among the most recent `batch_size`
    /// actions.
    pub fn failure_report(&self, batch_size: usize) -> CortexResult<Vec<ToolFailureSummary>> {
        let actions = self.recent(batch_size)?;
        let mut by_tool: std::collections::HashMap<String, Vec<Action>> = std::collections::HashMap::new();
        for action in actions {
            by_tool.entry(action.tool_name.clone()).or_default().push(action);
        }
        let mut summaries: Vec<ToolFailureSummary> = by_tool
            .into_iter()
            .map(|(tool_name, actions)| {
                let failures: Vec<Action> = actions.iter().filter(|a| !a.success).cloned().collect();
                ToolFailureSummary {
                    tool_name,
                    failure_count: failures.len(),
                    total_count: actions.len(),
                    failures,
                }
            })
            .filter(|s| s.failure_count > 1)
            .collect();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.failure_count));
        Ok(summaries)
    }
}

/// A candidate guardrail surfaced by repeated tool failures.
#[derive(Debug, Clone)]
pub struct RuleProposal {
    pub tool_name: String,
    pub suggested_condition: String,
    pub reason: String,
}

/// Turns the Action Journal's failure report into rule proposals once a
/// tool's failure rate crosses `RefinerConfig::failure_rate_threshold` and
/// the batch meets `min_action_batch`.
pub struct Refiner {
    config: RefinerConfig,
}

impl Refiner {
    pub fn new(config: RefinerConfig) -> Self {
        Self { config }
    }

    pub fn propose_from_failures(&self, journal: &ActionJournal, batch_size: usize) -> CortexResult<Vec<RuleProposal>> {
        let report = journal.failure_report(batch_size.max(self.config.min_action_batch))?;
        let proposals = report
            .into_iter()
            .filter(|s| s.total_count >= self.config.min_action_batch)
            .filter(|s| s.failure_rate() >= self.config.failure_rate_threshold)
            .map(|s| RuleProposal {
                suggested_condition: format!("tool_name == {}", s.tool_name),
                reason: format!(
                    "{} failed {}/{} recent invocations ({:.0}% failure rate)",
                    s.tool_name,
                    s.failure_count,
                    s.total_count,
                    s.failure_rate() * 100.0
                ),
                tool_name: s.tool_name,
            })
            .collect();
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Utc;

    fn journal() -> ActionJournal {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        ActionJournal::new(store, clock, "agent_actions")
    }

    #[test]
    fn failure_report_only_includes_tools_with_multiple_failures() {
        let journal = journal();
        for _ in 0..3 {
            journal
                .record(None, "flaky_tool", serde_json::json!({}), false, Some("boom".into()))
                .unwrap();
        }
        journal
            .record(None, "reliable_tool", serde_json::json!({}), false, Some("once".into()))
            .unwrap();
        let report = journal.failure_report(10).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].tool_name, "flaky_tool");
    }

    #[test]
    fn refiner_proposes_rule_above_threshold() {
        let journal = journal();
        for success in [false, false, false, true] {
            journal
                .record(None, "flaky_tool", serde_json::json!({}), success, None)
                .unwrap();
        }
        let refiner = Refiner::new(RefinerConfig {
            failure_rate_threshold: 0.5,
            min_action_batch: 3,
        });
        let proposals = refiner.propose_from_failures(&journal, 10).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].tool_name, "flaky_tool");
    }
}
