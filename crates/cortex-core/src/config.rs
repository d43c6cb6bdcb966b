//! `CortexConfig`: recognized configuration options. Construction
//! from TOML/env is out of scope (CLI/config bootstrap is an excluded
//! collaborator) — this struct only carries `serde`-deserializable values with
//! sensible defaults for every tunable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Minimum sample size before a verifying persona can stabilize.
    pub verification_window: u32,
    /// Z-score below which a verifying persona is rolled back.
    pub rollback_threshold_z: f64,
    /// Whether cross-lineage hive trust can halve the verification threshold.
    pub enable_hive_link: bool,
    /// 0.0-1.0 bias knob for randomized cross-pollination gating; default
    /// keeps seeded-clock tests deterministic.
    pub mutation_aggressiveness: f64,
    /// Cap on concurrently-experimental skills before pruning the bottom 20%.
    pub max_sandbox_skills: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            verification_window: 10,
            rollback_threshold_z: -2.0,
            enable_hive_link: true,
            mutation_aggressiveness: 0.5,
            max_sandbox_skills: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    /// Minimum failure rate across recent actions for a tool to be flagged.
    pub failure_rate_threshold: f64,
    /// Minimum number of recent actions before the refiner considers a tool.
    pub min_action_batch: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.3,
            min_action_batch: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Global blacklist window for a mutation recommendation (default: 1 hour).
    pub global_blacklist_duration_secs: i64,
    /// Local (same-persona) blacklist window (default: 24 hours).
    pub local_blacklist_duration_secs: i64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            global_blacklist_duration_secs: 3600,
            local_blacklist_duration_secs: 86_400,
        }
    }
}

/// Per-subsystem table name overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub sessions: String,
    pub messages: String,
    pub memories: String,
    pub goals: String,
    pub knowledge_base: String,
    pub knowledge_links: String,
    pub capabilities: String,
    pub personas: String,
    pub reflections: String,
    pub actions: String,
    pub metrics: String,
    pub rules: String,
    pub policies: String,
    pub rituals: String,
    pub snapshots: String,
    pub logic_probes: String,
    pub resource_usage: String,
    pub telemetry_events: String,
    pub session_evolution: String,
    pub research_metrics: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            sessions: "agent_sessions".into(),
            messages: "agent_messages".into(),
            memories: "agent_memories".into(),
            goals: "agent_goals".into(),
            knowledge_base: "agent_knowledge_base".into(),
            knowledge_links: "agent_knowledge_links".into(),
            capabilities: "agent_capabilities".into(),
            personas: "agent_personas".into(),
            reflections: "agent_reflections".into(),
            actions: "agent_actions".into(),
            metrics: "agent_metrics".into(),
            rules: "agent_rules".into(),
            policies: "agent_policies".into(),
            rituals: "agent_rituals".into(),
            snapshots: "agent_snapshots".into(),
            logic_probes: "agent_logic_probes".into(),
            resource_usage: "agent_resource_usage".into(),
            telemetry_events: "agent_telemetry_events".into(),
            session_evolution: "agent_session_evolution".into(),
            research_metrics: "agent_research_metrics".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CortexConfig {
    /// Message count above which a session is compressed by the `compression` ritual.
    pub context_window_size: usize,
    pub evolution: EvolutionConfig,
    pub refiner: RefinerConfig,
    pub strategy: StrategyConfig,
    /// TTL (seconds) for the policy budget-total cache (default 60s).
    pub policy_cache_ttl_secs: u64,
    /// Max lessons considered by `synthesizeLessons` (default 500).
    pub max_synthesis_items: usize,
    pub tables: TableNames,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            context_window_size: 40,
            evolution: EvolutionConfig::default(),
            refiner: RefinerConfig::default(),
            strategy: StrategyConfig::default(),
            policy_cache_ttl_secs: 60,
            max_synthesis_items: 500,
            tables: TableNames::default(),
        }
    }
}
