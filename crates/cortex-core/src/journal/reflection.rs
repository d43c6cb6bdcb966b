//! Reflection Log & Recursive Reasoner.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::CortexResult;
use crate::model::{Goal, GoalStatus, Persona, Reflection, ReflectionOutcome};
use crate::store::SledStore;

/// Explicit conflict-word pairs checked by `detect_contradictions`,
/// in addition to any caller-registered pairs.
const BUILTIN_CONFLICT_PAIRS: &[(&str, &str)] = &[
    ("minimize", "maximize"),
    ("increase", "decrease"),
    ("low", "high"),
    ("fast", "slow"),
    ("short", "long"),
    ("start", "stop"),
    ("enable", "disable"),
];

/// Caps applied to `detectContradictions`' pairwise scan
/// and to the result list.
const BUCKET_CAP: usize = 100;
const CONTRADICTION_RESULT_CAP: usize = 50;

/// Sentinel session id used for system-level goals that don't belong to any
/// interactive session.
pub const SYSTEM_SESSION_ID: Uuid = Uuid::nil();

pub struct ReflectionLog {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    reflections_table: String,
    goals_table: String,
    extra_conflict_pairs: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct Contradiction {
    pub goal_a: Uuid,
    pub goal_b: Uuid,
    pub word_a: String,
    pub word_b: String,
}

impl ReflectionLog {
    pub fn new(
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        reflections_table: impl Into<String>,
        goals_table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            reflections_table: reflections_table.into(),
            goals_table: goals_table.into(),
            extra_conflict_pairs: Vec::new(),
        }
    }

    pub fn register_conflict_pair(&mut self, a: impl Into<String>, b: impl Into<String>) {
        self.extra_conflict_pairs.push((a.into(), b.into()));
    }

    #[tracing::instrument(skip(self, metadata), target = "cortex::reflection")]
    pub fn reflect(
        &self,
        session_id: Uuid,
        outcome: ReflectionOutcome,
        lessons_learned: String,
        suggested_actions: Option<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> CortexResult<Reflection> {
        let reflection = Reflection {
            id: Uuid::new_v4(),
            session_id,
            outcome,
            lessons_learned,
            suggested_actions,
            metadata,
            created_at: self.clock.now(),
        };
        self.store
            .put(&self.reflections_table, &reflection.id.to_string(), &reflection)?;
        tracing::info!(target: "cortex::reflection", session_id = %session_id, ?outcome, "reflection recorded");
        Ok(reflection)
    }

    fn all_reflections(&self) -> CortexResult<Vec<Reflection>> {
        Ok(self
            .store
            .scan::<Reflection>(&self.reflections_table)?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    /// Groups the most recent `max_items` lessons by their "defining token":
    /// the token maximizing `len(token) / frequency(token)` across the corpus.
    pub fn synthesize_lessons(&self, max_items: usize) -> CortexResult<BTreeMap<String, Vec<String>>> {
        let mut reflections = self.all_reflections()?;
        reflections.sort_by_key(|r| r.created_at);
        let recent: Vec<&Reflection> = reflections.iter().rev().take(max_items).collect();

        let mut freq: HashMap<String, usize> = HashMap::new();
        let tokenized: Vec<(String, Vec<String>)> = recent
            .iter()
            .map(|r| {
                let tokens: Vec<String> = tokenize(&r.lessons_learned);
                for t in &tokens {
                    *freq.entry(t.clone()).or_insert(0) += 1;
                }
                (r.lessons_learned.clone(), tokens)
            })
            .collect();

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (lesson, tokens) in tokenized {
            let defining = tokens.into_iter().max_by(|a, b| {
                let score_a = a.len() as f64 / *freq.get(a).unwrap_or(&1) as f64;
                let score_b = b.len() as f64 / *freq.get(b).unwrap_or(&1) as f64;
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            });
            let key = defining.unwrap_or_else(|| "misc".to_string());
            groups.entry(key).or_default().push(lesson);
        }
        Ok(groups)
    }

    fn goal_exists_with_description(&self, description: &str) -> CortexResult<bool> {
        Ok(self
            .store
            .scan::<Goal>(&self.goals_table)?
            .into_iter()
            .any(|(_, g)| g.description == description))
    }

    /// For every stable persona carrying a `mutation_reason`, insert a
    /// system-level goal `"Systemic Best-Practice: <reasoning>"` unless one
    /// with that exact description already exists.
    #[tracing::instrument(skip(self, personas), target = "cortex::reflection")]
    pub fn cross_pollinate_goals(&self, personas: &[Persona]) -> CortexResult<usize> {
        let mut inserted = 0;
        for persona in personas {
            if persona.metadata.evolution_status != crate::model::EvolutionStatus::Stable {
                continue;
            }
            let Some(reason) = &persona.metadata.mutation_reason else {
                continue;
            };
            let description = format!("Systemic Best-Practice: {reason}");
            if self.goal_exists_with_description(&description)? {
                continue;
            }
            let now = self.clock.now();
            let goal = Goal {
                id: Uuid::new_v4(),
                session_id: SYSTEM_SESSION_ID,
                parent_id: None,
                description,
                status: GoalStatus::Pending,
                priority: 0,
                metadata: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            };
            self.store.put(&self.goals_table, &goal.id.to_string(), &goal)?;
            inserted += 1;
        }
        tracing::info!(target: "cortex::reflection", inserted, "cross-pollinated goals");
        Ok(inserted)
    }

    /// O(N) contradiction detection over an inverted token index: goals are
    /// bucketed by token, then pairwise checked within each bucket (capped at
    /// `BUCKET_CAP`) for an explicit conflict-word pair. Results capped at
    /// `CONTRADICTION_RESULT_CAP`.
    pub fn detect_contradictions(&self) -> CortexResult<Vec<Contradiction>> {
        let goals: Vec<Goal> = self
            .store
            .scan::<Goal>(&self.goals_table)?
            .into_iter()
            .map(|(_, g)| g)
            .filter(|g| !matches!(g.status, GoalStatus::Completed | GoalStatus::Failed))
            .collect();

        let mut by_token: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, goal) in goals.iter().enumerate() {
            for token in tokenize(&goal.description) {
                by_token.entry(token).or_default().push(idx);
            }
        }

        let pairs = self.all_conflict_pairs();
        let mut seen_bucket_tokens: HashSet<String> = HashSet::new();
        let mut results = Vec::new();

        for (word_a, word_b) in &pairs {
            let bucket_a = by_token.get(word_a);
            let bucket_b = by_token.get(word_b);
            let (Some(bucket_a), Some(bucket_b)) = (bucket_a, bucket_b) else {
                continue;
            };
            if !seen_bucket_tokens.insert(format!("{word_a}:{word_b}")) {
                continue;
            }
            'outer: for &i in bucket_a.iter().take(BUCKET_CAP) {
                for &j in bucket_b.iter().take(BUCKET_CAP) {
                    if i == j {
                        continue;
                    }
                    results.push(Contradiction {
                        goal_a: goals[i].id,
                        goal_b: goals[j].id,
                        word_a: word_a.clone(),
                        word_b: word_b.clone(),
                    });
                    if results.len() >= CONTRADICTION_RESULT_CAP {
                        break 'outer;
                    }
                }
            }
            if results.len() >= CONTRADICTION_RESULT_CAP {
                break;
            }
        }
        Ok(results)
    }

    /// Whether `candidate_role` textually collides with an active contradiction.
    pub fn collides_with_contradiction(&self, candidate_role: &str) -> CortexResult<bool> {
        let contradictions = self.detect_contradictions()?;
        let lowered = candidate_role.to_lowercase();
        Ok(contradictions
            .iter()
            .any(|c| lowered.contains(&c.word_a) && lowered.contains(&c.word_b)))
    }

    fn all_conflict_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = BUILTIN_CONFLICT_PAIRS
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        pairs.extend(self.extra_conflict_pairs.clone());
        pairs
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn log() -> ReflectionLog {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        ReflectionLog::new(store, clock, "agent_reflections", "agent_goals")
    }

    #[test]
    fn detects_explicit_conflict_pair() {
        let log = log();
        let session = Uuid::new_v4();
        let now = Utc::now();
        for desc in ["minimize latency everywhere", "maximize latency for batch jobs"] {
            let goal = Goal {
                id: Uuid::new_v4(),
                session_id: session,
                parent_id: None,
                description: desc.to_string(),
                status: GoalStatus::Pending,
                priority: 0,
                metadata: BTreeMap::new(),
                created_at: now,
                updated_at: now,
            };
            log.store.put(&log.goals_table, &goal.id.to_string(), &goal).unwrap();
        }
        let contradictions = log.detect_contradictions().unwrap();
        assert_eq!(contradictions.len(), 1);
    }

    #[test]
    fn cross_pollination_is_idempotent_on_description() {
        let log = log();
        let now = Utc::now();
        let mut persona = Persona {
            id: Uuid::new_v4(),
            name: "p".into(),
            role: "role".into(),
            capabilities: vec![],
            policies: vec![],
            metadata: crate::model::PersonaMetadata::default(),
            created_at: now,
            updated_at: now,
        };
        persona.metadata.mutation_reason = Some("cache hot paths".into());
        let inserted_first = log.cross_pollinate_goals(&[persona.clone()]).unwrap();
        let inserted_second = log.cross_pollinate_goals(&[persona]).unwrap();
        assert_eq!(inserted_first, 1);
        assert_eq!(inserted_second, 0);
    }
}
