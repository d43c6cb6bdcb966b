//! Goal tree: parent -> child forms a tree,
//! cycles forbidden.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::model::{Goal, GoalStatus};
use crate::store::SledStore;

pub struct GoalStore {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
}

impl GoalStore {
    pub fn new(store: Arc<SledStore>, clock: Arc<dyn Clock>, table: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
        }
    }

    pub fn get(&self, id: Uuid) -> CortexResult<Option<Goal>> {
        self.store.get(&self.table, &id.to_string())
    }

    pub fn all(&self) -> CortexResult<Vec<Goal>> {
        Ok(self.store.scan::<Goal>(&self.table)?.into_iter().map(|(_, g)| g).collect())
    }

    /// Walks `candidate_parent`'s ancestor chain looking for `new_id`; a match
    /// means attaching `new_id` under `candidate_parent` would close a cycle.
    fn would_cycle(&self, candidate_parent: Uuid, new_id: Uuid) -> CortexResult<bool> {
        let mut current = Some(candidate_parent);
        let mut hops = 0;
        while let Some(id) = current {
            if id == new_id {
                return Ok(true);
            }
            hops += 1;
            if hops > 10_000 {
                return Err(CortexError::Inconsistent("goal ancestor chain exceeds sane depth".into()));
            }
            current = self.get(id)?.and_then(|g| g.parent_id);
        }
        Ok(false)
    }

    /// Inserts `description` as a child of `parent_id` (or a root goal if
    /// `None`), rejecting any parent chain that would reach the new goal's
    /// own id.
    #[tracing::instrument(skip(self, description, metadata), target = "cortex::goal")]
    pub fn deconstruct_goal(
        &self,
        session_id: Uuid,
        parent_id: Option<Uuid>,
        description: String,
        priority: i32,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> CortexResult<Goal> {
        let id = Uuid::new_v4();
        if let Some(parent) = parent_id {
            if self.get(parent)?.is_none() {
                return Err(CortexError::not_found("Goal", parent.to_string()));
            }
            if self.would_cycle(parent, id)? {
                return Err(CortexError::Inconsistent(format!(
                    "goal {parent} cannot become a parent of {id}: would create a cycle"
                )));
            }
        }
        let now = self.clock.now();
        let goal = Goal {
            id,
            session_id,
            parent_id,
            description,
            status: GoalStatus::Pending,
            priority,
            metadata,
            created_at: now,
            updated_at: now,
        };
        self.store.put(&self.table, &id.to_string(), &goal)?;
        Ok(goal)
    }

    pub fn set_status(&self, id: Uuid, status: GoalStatus) -> CortexResult<Goal> {
        let now = self.clock.now();
        self.store
            .update(&self.table, &id.to_string(), move |current: Option<Goal>| {
                let mut goal = current.ok_or_else(|| CortexError::not_found("Goal", id.to_string()))?;
                goal.status = status;
                goal.updated_at = now;
                Ok(Some(goal))
            })?
            .ok_or_else(|| CortexError::not_found("Goal", id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Utc;

    fn store() -> GoalStore {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        GoalStore::new(store, clock, "agent_goals")
    }

    #[test]
    fn parent_to_child_tree_is_accepted() {
        let store = store();
        let session = Uuid::new_v4();
        let root = store.deconstruct_goal(session, None, "root".into(), 0, BTreeMap::new()).unwrap();
        let child = store
            .deconstruct_goal(session, Some(root.id), "child".into(), 0, BTreeMap::new())
            .unwrap();
        assert_eq!(child.parent_id, Some(root.id));
    }

    #[test]
    fn reattaching_an_ancestor_as_a_descendant_is_rejected() {
        let store = store();
        let session = Uuid::new_v4();
        let root = store.deconstruct_goal(session, None, "root".into(), 0, BTreeMap::new()).unwrap();
        let child = store
            .deconstruct_goal(session, Some(root.id), "child".into(), 0, BTreeMap::new())
            .unwrap();

        // Attempting to re-parent `root` under `child` would close a cycle.
        let mut root_row = store.get(root.id).unwrap().unwrap();
        root_row.parent_id = Some(child.id);
        let result = store.would_cycle(child.id, root.id);
        assert_eq!(result.unwrap(), false); // child has no parent yet, not a cycle by itself

        // But creating a *new* goal under `child` whose id happens to equal an
        // ancestor already in the chain is exactly what `would_cycle` guards;
        // exercise it directly via the public insertion path using the same id
        // is not possible (ids are fresh), so assert the helper behaves for a
        // known-cyclic chain instead.
        assert!(store.would_cycle(child.id, child.id).unwrap());
    }
}
