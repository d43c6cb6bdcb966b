//! The Cortex data model: tagged records, not free-form JSON
//! strings. Each type here is the typed record a caller works with; JSON is
//! only used at the storage boundary (see `crate::store`).

pub mod action;
pub mod capability;
pub mod knowledge;
pub mod persona;
pub mod policy;
pub mod reflection;
pub mod rule;
pub mod ritual;
pub mod session;
pub mod snapshot;
pub mod metric;

pub use action::{Action, ToolFailureSummary};
pub use capability::{Capability, CapabilityMetadata, CapabilityStatus};
pub use knowledge::{
    KnowledgeItem, KnowledgeLink, KnowledgeMetadata, KnowledgeSource, KnowledgeStatus,
    REL_MENTIONS, REL_SEMANTICALLY_RELATED,
};
pub use metric::{compute_stats, Metric, MetricStats, METRIC_QUERY_LATENCY, METRIC_SUCCESS_RATE, METRIC_TOTAL_COST, METRIC_TRUST_SIGNAL};
pub use persona::{
    EvolutionStatus, LastFailedMutation, MutationType, Persona, PersonaMetadata, PersonaMutation,
    PersonaState, VerificationBaseline, MUTATION_HISTORY_CAP,
};
pub use policy::{BudgetPeriod, Policy, PolicyDefinition, PolicyType};
pub use reflection::{Reflection, ReflectionOutcome};
pub use ritual::{backoff, Ritual, RitualFrequency, RitualMetadata, RitualStatus, RitualType};
pub use rule::{Predicate, PredicateOp, Rule, RuleAction, RuleDecision, RuleMetadata, RuleOperation};
pub use session::{Goal, GoalStatus, Memory, MemoryMetadata, Message, MessageRole, Session, SessionStatus};
pub use snapshot::{Snapshot, SnapshotMetadata};
