//! Cortex: a self-evolving cognitive substrate.
//!
//! `cortex-core` holds every leaf service — Store Adapter, Metrics Ledger,
//! Reflection Log, Knowledge Graph, Ablation Engine, Capability Registry,
//! Skill Synthesizer, Hive Broadcaster, Governance Auditor, Janitor, and the
//! Ritual Orchestrator that schedules them — plus the `Cortex` composite that
//! wires them together. The Strategic Planner and Evolutionary Pilot live in
//! `cortex-evolution`, which depends on this crate; the reverse dependency
//! would be circular, so the Ritual Orchestrator's `optimization` dispatch
//! calls back into the evolution layer only through the `EvolutionHook` port.

pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod goal;
pub mod governance;
pub mod http_completer;
pub mod janitor;
pub mod journal;
pub mod knowledge;
pub mod model;
pub mod persona;
pub mod ports;
pub mod ritual;
pub mod session;
pub mod store;

use std::sync::Arc;

use clock::{Clock, SystemClock};
use config::CortexConfig;
use error::CortexResult;
use ports::{Completer, Embedder, EvolutionHook, NullCompleter};
use store::SledStore;

use capability::{CapabilityRegistry, HiveBroadcaster, SkillSynthesizer};
use goal::GoalStore;
use governance::{GovernanceAuditor, PolicyEnforcer, RuleEngine};
use janitor::Janitor;
use journal::{ActionJournal, MetricsLedger, ReflectionLog, Refiner};
use knowledge::{AblationEngine, KnowledgeGraph};
use persona::PersonaStore;
use ritual::RitualOrchestrator;
use session::SessionStore;

/// The composite root: every leaf service constructed first, then the
/// services that depend on them, then the Ritual Orchestrator that ties the
/// maintenance loop together.
pub struct Cortex {
    pub config: CortexConfig,
    pub store: Arc<SledStore>,
    pub clock: Arc<dyn Clock>,
    pub completer: Option<Arc<dyn Completer>>,
    pub embedder: Option<Arc<dyn Embedder>>,

    pub sessions: Arc<SessionStore>,
    pub goals: Arc<GoalStore>,
    pub metrics: Arc<MetricsLedger>,
    pub reflections: Arc<ReflectionLog>,
    pub actions: Arc<ActionJournal>,
    pub refiner: Arc<Refiner>,
    pub knowledge: Arc<KnowledgeGraph>,
    pub ablation: Arc<AblationEngine>,
    pub personas: Arc<PersonaStore>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub synthesizer: Arc<SkillSynthesizer>,
    pub hive: Arc<HiveBroadcaster>,
    pub rules: Arc<RuleEngine>,
    pub policies: Arc<PolicyEnforcer>,
    pub governance: Arc<GovernanceAuditor>,
    pub janitor: Arc<Janitor>,
    pub rituals: Arc<RitualOrchestrator>,
}

impl Cortex {
    /// Wires every subsystem over a single `SledStore`, using the table names
    /// and tunables in `config`. Pass
    /// `evolution_hook` as `Some(Arc::new(EvolutionaryPilot::new(...)))` from
    /// `cortex-evolution` to enable the `optimization` ritual; `None` leaves
    /// it a logged no-op.
    pub fn new(
        config: CortexConfig,
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        completer: Option<Arc<dyn Completer>>,
        embedder: Option<Arc<dyn Embedder>>,
        evolution_hook: Option<Arc<dyn EvolutionHook>>,
    ) -> CortexResult<Self> {
        let tables = config.tables.clone();

        let sessions = Arc::new(SessionStore::new(
            store.clone(),
            clock.clone(),
            tables.sessions.clone(),
            tables.messages.clone(),
            tables.memories.clone(),
        ));
        let goals = Arc::new(GoalStore::new(store.clone(), clock.clone(), tables.goals.clone()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), tables.metrics.clone()));
        let reflections = Arc::new(ReflectionLog::new(store.clone(), clock.clone(), tables.reflections.clone(), tables.goals.clone()));
        let actions = Arc::new(ActionJournal::new(store.clone(), clock.clone(), tables.actions.clone()));
        let refiner = Arc::new(Refiner::new(config.refiner.clone()));
        let knowledge = Arc::new(KnowledgeGraph::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            tables.knowledge_base.clone(),
            tables.knowledge_links.clone(),
        ));
        let ablation = Arc::new(AblationEngine::new(
            store.clone(),
            clock.clone(),
            knowledge.clone(),
            reflections.clone(),
            metrics.clone(),
            tables.memories.clone(),
        ));
        let personas = Arc::new(PersonaStore::new(store.clone(), clock.clone(), tables.personas.clone()));
        let capabilities = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), tables.capabilities.clone()));
        let synthesizer = Arc::new(SkillSynthesizer::new(clock.clone(), capabilities.clone(), config.evolution.clone()));
        let hive = Arc::new(HiveBroadcaster::new(capabilities.clone(), knowledge.clone(), clock.clone()));
        let rules = Arc::new(RuleEngine::new(store.clone(), clock.clone(), tables.rules.clone()));
        let policies = Arc::new(PolicyEnforcer::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            tables.policies.clone(),
            config.policy_cache_ttl_secs,
        ));
        let governance = Arc::new(GovernanceAuditor::new(
            metrics.clone(),
            policies.clone(),
            personas.clone(),
            capabilities.clone(),
            reflections.clone(),
            clock.clone(),
            store.clone(),
            tables.rituals.clone(),
        ));
        let janitor = Arc::new(Janitor::new(
            store.clone(),
            clock.clone(),
            knowledge.clone(),
            ablation.clone(),
            sessions.clone(),
            metrics.clone(),
        ));
        let rituals = Arc::new(RitualOrchestrator::new(
            store.clone(),
            clock.clone(),
            tables.rituals.clone(),
            sessions.clone(),
            janitor.clone(),
            synthesizer.clone(),
            actions.clone(),
            hive.clone(),
            knowledge.clone(),
            capabilities.clone(),
            completer.clone(),
            evolution_hook,
            config.context_window_size,
        ));

        Ok(Self {
            config,
            store,
            clock,
            completer,
            embedder,
            sessions,
            goals,
            metrics,
            reflections,
            actions,
            refiner,
            knowledge,
            ablation,
            personas,
            capabilities,
            synthesizer,
            hive,
            rules,
            policies,
            governance,
            janitor,
            rituals,
        })
    }

    /// Opens (or creates) a `sled` store at `path` with `SystemClock` and no
    /// AI capabilities — the minimal production entry point. Callers that
    /// need a `Completer`/`Embedder`/`EvolutionHook` should use `new`
    /// directly.
    pub fn open(path: impl AsRef<std::path::Path>, config: CortexConfig) -> CortexResult<Self> {
        let store = Arc::new(SledStore::open(path)?);
        Self::new(config, store, Arc::new(SystemClock), None, None, None)
    }

    /// An ephemeral, in-memory Cortex with a `NullCompleter` and no
    /// embedder, for tests and examples.
    pub fn temporary(config: CortexConfig) -> CortexResult<Self> {
        let store = Arc::new(SledStore::temporary()?);
        Self::new(config, store, Arc::new(SystemClock), Some(Arc::new(NullCompleter)), None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_temporary_cortex_wires_every_subsystem_over_one_store() {
        let cortex = Cortex::temporary(CortexConfig::default()).unwrap();
        let session = cortex.sessions.create_session().unwrap();
        assert!(cortex.sessions.get_session(session.id).unwrap().is_some());
        cortex.rituals.ensure_default_rituals().unwrap();
    }
}
