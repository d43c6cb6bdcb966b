//! Ritual Orchestrator: the distributed
//! lease protocol and the ritual dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;

use crate::capability::{CapabilityRegistry, HiveBroadcaster, SkillSynthesizer};
use crate::clock::Clock;
use crate::error::{CortexError, CortexResult};
use crate::janitor::Janitor;
use crate::journal::ActionJournal;
use crate::knowledge::KnowledgeGraph;
use crate::model::{backoff, KnowledgeItem, Ritual, RitualFrequency, RitualStatus, RitualType};
use crate::ports::{Completer, EvolutionHook};
use crate::session::SessionStore;
use crate::store::SledStore;

/// Domain-tag boost applied by `syncDomain` for a domain whose capability
/// population has matured.
const MATURE_DOMAIN_BOOST: f64 = 0.15;
const YOUNG_DOMAIN_BOOST: f64 = 0.05;
const MATURE_RELIABILITY_FLOOR: f64 = 0.95;
const MATURE_POPULATION_FLOOR: usize = 3;
/// Active-domain gate: only tags whose summed recent confidence clears this
/// are considered for a sync boost.
const ACTIVE_DOMAIN_CONFIDENCE_FLOOR: f64 = 1.0;
const ACTIVE_DOMAIN_TOP_N: usize = 3;
/// "Recent" window for the active-domain confidence sum, chosen to match the
/// local mutation-blacklist window.
const ACTIVE_DOMAIN_LOOKBACK_HOURS: i64 = 24;

pub struct RitualOrchestrator {
    store: Arc<SledStore>,
    clock: Arc<dyn Clock>,
    table: String,
    sessions: Arc<SessionStore>,
    janitor: Arc<Janitor>,
    synthesizer: Arc<SkillSynthesizer>,
    action_journal: Arc<ActionJournal>,
    hive: Arc<HiveBroadcaster>,
    knowledge: Arc<KnowledgeGraph>,
    capabilities: Arc<CapabilityRegistry>,
    completer: Option<Arc<dyn Completer>>,
    evolution_hook: Option<Arc<dyn EvolutionHook>>,
    context_window_size: usize,
}

impl RitualOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SledStore>,
        clock: Arc<dyn Clock>,
        table: impl Into<String>,
        sessions: Arc<SessionStore>,
        janitor: Arc<Janitor>,
        synthesizer: Arc<SkillSynthesizer>,
        action_journal: Arc<ActionJournal>,
        hive: Arc<HiveBroadcaster>,
        knowledge: Arc<KnowledgeGraph>,
        capabilities: Arc<CapabilityRegistry>,
        completer: Option<Arc<dyn Completer>>,
        evolution_hook: Option<Arc<dyn EvolutionHook>>,
        context_window_size: usize,
    ) -> Self {
        Self {
            store,
            clock,
            table: table.into(),
            sessions,
            janitor,
            synthesizer,
            action_journal,
            hive,
            knowledge,
            capabilities,
            completer,
            evolution_hook,
            context_window_size,
        }
    }

    /// Seeds the four standard rituals at their conventional frequencies if
    /// the table is empty. Not itself part of the lease protocol; a bootstrap
    /// convenience so a fresh Cortex has something for the scheduler to find.
    pub fn ensure_default_rituals(&self) -> CortexResult<()> {
        if !self.store.scan::<Ritual>(&self.table)?.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let defaults = [
            ("compression", RitualType::Compression, RitualFrequency::Hourly),
            ("optimization", RitualType::Optimization, RitualFrequency::Hourly),
            ("pruning", RitualType::Pruning, RitualFrequency::Daily),
            ("evolution", RitualType::Evolution, RitualFrequency::Daily),
        ];
        for (name, kind, frequency) in defaults {
            let id = self.store.next_id("rituals")?;
            let ritual = Ritual {
                id,
                name: name.to_string(),
                kind,
                frequency,
                status: RitualStatus::Pending,
                last_run: None,
                next_run: now,
                locked_until: None,
                metadata: Default::default(),
            };
            self.store.put(&self.table, &id.to_string(), &ritual)?;
        }
        Ok(())
    }

    /// Step 1-2 of the lease protocol: claims every due, unleased ritual by
    /// row-locked CAS, setting `locked_until = now + 10min`.
    fn claim_due_rituals(&self) -> CortexResult<Vec<Ritual>> {
        let now = self.clock.now();
        let lease_until = now + chrono::Duration::minutes(10);
        let mut claimed = Vec::new();
        let candidates: Vec<i64> = self
            .store
            .scan::<Ritual>(&self.table)?
            .into_iter()
            .map(|(_, r)| r.id)
            .collect();
        for id in candidates {
            // `store.update` only ever hands back the closure's *last*
            // computed value, not whether this particular call was the one
            // that flipped the row from free to leased -- a loser who reads
            // an already-leased row with the same `lease_until` (shared
            // clock) would otherwise look indistinguishable from the
            // winner. Signal the transition from inside the closure itself.
            let mut won_claim = false;
            let result = self.store.update(&self.table, &id.to_string(), |current: Option<Ritual>| {
                won_claim = false;
                let Some(mut ritual) = current else { return Ok(None) };
                let due = ritual.next_run <= now;
                let free = ritual.locked_until.map_or(true, |lu| lu <= now);
                if !due || !free {
                    return Ok(Some(ritual));
                }
                ritual.locked_until = Some(lease_until);
                won_claim = true;
                Ok(Some(ritual))
            })?;
            if won_claim {
                if let Some(ritual) = result {
                    claimed.push(ritual);
                }
            }
        }
        Ok(claimed)
    }

    /// Step 3-4: executes every claimed ritual outside the claiming
    /// transaction, then records status/next_run/backoff.
    #[tracing::instrument(skip(self), target = "cortex::ritual")]
    pub async fn run_due_rituals(&self) -> CortexResult<Vec<Ritual>> {
        let due = self.claim_due_rituals()?;
        let mut completed = Vec::new();
        for ritual in due {
            let outcome = self.dispatch(ritual.kind).await;
            let ritual = self.complete_ritual(ritual.id, outcome)?;
            completed.push(ritual);
        }
        Ok(completed)
    }

    async fn dispatch(&self, kind: RitualType) -> Result<Map<String, serde_json::Value>, String> {
        match kind {
            RitualType::Compression => self.run_compression().await,
            RitualType::Optimization => self.run_optimization().await,
            RitualType::Pruning => self.run_pruning(),
            RitualType::Evolution => self.run_evolution().await,
        }
    }

    async fn run_compression(&self) -> Result<Map<String, serde_json::Value>, String> {
        let due = self
            .sessions
            .sessions_needing_compression(self.context_window_size)
            .map_err(|e| e.to_string())?;
        let mut compressed = 0;
        for session_id in due {
            let completer = self.completer.as_deref();
            if self
                .sessions
                .compress_session(session_id, self.context_window_size, completer)
                .await
                .map_err(|e| e.to_string())?
                .is_some()
            {
                compressed += 1;
            }
        }
        let mut meta = Map::new();
        meta.insert("sessions_compressed".into(), serde_json::json!(compressed));
        Ok(meta)
    }

    async fn run_optimization(&self) -> Result<Map<String, serde_json::Value>, String> {
        if let Some(hook) = &self.evolution_hook {
            hook.run_self_improvement_cycle().await?;
        } else {
            tracing::warn!(target: "cortex::ritual", "optimization ritual skipped: no evolution hook configured");
        }
        self.janitor.optimize_database().map_err(|e| e.to_string())?;
        Ok(Map::new())
    }

    fn run_pruning(&self) -> Result<Map<String, serde_json::Value>, String> {
        let report = self.janitor.run_pruning_ritual().map_err(|e| e.to_string())?;
        let mut meta = Map::new();
        meta.insert("low_confidence_pruned".into(), serde_json::json!(report.low_confidence_pruned));
        meta.insert("zombie_items_pruned".into(), serde_json::json!(report.zombie_items_pruned));
        meta.insert("orphans_cleaned".into(), serde_json::json!(report.orphans_cleaned));
        Ok(meta)
    }

    async fn run_evolution(&self) -> Result<Map<String, serde_json::Value>, String> {
        let completer = self.completer.as_deref();
        let synthesis = self
            .synthesizer
            .discover_and_synthesize(&self.action_journal, completer)
            .await
            .map_err(|e| e.to_string())?;
        let prewarmed = self
            .synthesizer
            .prewarm_nearing_promotion(completer)
            .await
            .map_err(|e| e.to_string())?;
        let alphas = self.hive.broadcast_skills().map_err(|e| e.to_string())?;

        let domains = self.active_domains().map_err(|e| e.to_string())?;
        let mut synced = Vec::new();
        for (tag, _summed_confidence) in domains {
            let boost = self.domain_boost(&tag).map_err(|e| e.to_string())?;
            let updated = self.hive.sync_domain(&tag, boost).map_err(|e| e.to_string())?;
            synced.push(serde_json::json!({"domain": tag, "boost": boost, "updated": updated}));
        }

        let mut meta = Map::new();
        meta.insert(
            "skills_registered".into(),
            serde_json::json!(matches!(synthesis, crate::capability::synthesizer::SynthesisOutcome::Registered(ref v) if !v.is_empty())),
        );
        meta.insert("prewarmed".into(), serde_json::json!(prewarmed));
        meta.insert("alphas".into(), serde_json::json!(alphas));
        meta.insert("synced_domains".into(), serde_json::json!(synced));
        Ok(meta)
    }

    /// Top `ACTIVE_DOMAIN_TOP_N` knowledge tags by summed confidence over the
    /// last `ACTIVE_DOMAIN_LOOKBACK_HOURS`, gated at
    /// `ACTIVE_DOMAIN_CONFIDENCE_FLOOR`.
    fn active_domains(&self) -> CortexResult<Vec<(String, f64)>> {
        let since = self.clock.now() - chrono::Duration::hours(ACTIVE_DOMAIN_LOOKBACK_HOURS);
        let items = self.store.scan::<KnowledgeItem>(self.knowledge.items_table())?;
        let mut by_tag: HashMap<String, f64> = HashMap::new();
        for (_, item) in items {
            if item.updated_at < since {
                continue;
            }
            for tag in &item.tags {
                *by_tag.entry(tag.clone()).or_insert(0.0) += item.confidence;
            }
        }
        let mut ranked: Vec<(String, f64)> = by_tag.into_iter().filter(|(_, sum)| *sum >= ACTIVE_DOMAIN_CONFIDENCE_FLOOR).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(ACTIVE_DOMAIN_TOP_N);
        Ok(ranked)
    }

    /// Mature domains (population >= 3, mean reliability >= 0.95) get the
    /// larger boost. Population/reliability are read from
    /// capabilities whose name's leading `_`-delimited segment matches the
    /// domain tag, mirroring the Skill Synthesizer's own domain grouping.
    fn domain_boost(&self, domain: &str) -> CortexResult<f64> {
        let members: Vec<_> = self
            .capabilities
            .all()?
            .into_iter()
            .filter(|c| c.name.split('_').next().unwrap_or(&c.name) == domain)
            .collect();
        if members.len() < MATURE_POPULATION_FLOOR {
            return Ok(YOUNG_DOMAIN_BOOST);
        }
        let mean_reliability = members.iter().map(|c| c.reliability).sum::<f64>() / members.len() as f64;
        Ok(if mean_reliability >= MATURE_RELIABILITY_FLOOR {
            MATURE_DOMAIN_BOOST
        } else {
            YOUNG_DOMAIN_BOOST
        })
    }

    /// Step 4: finalizes a completed ritual's status, lease release, and
    /// exponential-backoff-adjusted `next_run`.
    fn complete_ritual(&self, ritual_id: i64, outcome: Result<Map<String, serde_json::Value>, String>) -> CortexResult<Ritual> {
        let now = self.clock.now();
        self.store
            .update(&self.table, &ritual_id.to_string(), move |current: Option<Ritual>| {
                let Some(mut ritual) = current else { return Ok(None) };
                match &outcome {
                    Ok(meta) => {
                        ritual.status = RitualStatus::Success;
                        ritual.metadata.failure_count = 0;
                        ritual.metadata.error = None;
                        ritual.metadata.extra.extend(meta.clone());
                    }
                    Err(reason) => {
                        ritual.status = RitualStatus::Failure;
                        ritual.metadata.failure_count += 1;
                        ritual.metadata.error = Some(reason.clone());
                    }
                }
                ritual.last_run = Some(now);
                let base = ritual.frequency.base_interval();
                ritual.next_run = now + base + backoff(base, ritual.metadata.failure_count);
                ritual.locked_until = None;
                Ok(Some(ritual))
            })?
            .ok_or_else(|| CortexError::not_found("Ritual", ritual_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::EvolutionConfig;
    use crate::journal::MetricsLedger;

    struct NoopHook;
    #[async_trait::async_trait]
    impl EvolutionHook for NoopHook {
        async fn run_self_improvement_cycle(&self) -> Result<(), String> {
            Ok(())
        }
    }

    fn orchestrator() -> RitualOrchestrator {
        let store = Arc::new(SledStore::temporary().unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let metrics = Arc::new(MetricsLedger::new(store.clone(), clock.clone(), "agent_metrics"));
        let knowledge = Arc::new(KnowledgeGraph::new(
            store.clone(),
            clock.clone(),
            metrics.clone(),
            "agent_knowledge_base",
            "agent_knowledge_links",
        ));
        let reflections = Arc::new(crate::journal::ReflectionLog::new(store.clone(), clock.clone(), "agent_reflections", "agent_goals"));
        let ablation = Arc::new(crate::knowledge::AblationEngine::new(
            store.clone(),
            clock.clone(),
            knowledge.clone(),
            reflections,
            metrics.clone(),
            "agent_memories",
        ));
        let sessions = Arc::new(SessionStore::new(store.clone(), clock.clone(), "agent_sessions", "agent_messages", "agent_memories"));
        let janitor = Arc::new(Janitor::new(store.clone(), clock.clone(), knowledge.clone(), ablation, sessions.clone(), metrics));
        let capabilities = Arc::new(CapabilityRegistry::new(store.clone(), clock.clone(), "agent_capabilities"));
        let synthesizer = Arc::new(SkillSynthesizer::new(clock.clone(), capabilities.clone(), EvolutionConfig::default()));
        let action_journal = Arc::new(ActionJournal::new(store.clone(), clock.clone(), "agent_actions"));
        let hive = Arc::new(HiveBroadcaster::new(capabilities.clone(), knowledge.clone(), clock.clone()));
        RitualOrchestrator::new(
            store,
            clock,
            "agent_rituals",
            sessions,
            janitor,
            synthesizer,
            action_journal,
            hive,
            knowledge,
            capabilities,
            None,
            Some(Arc::new(NoopHook)),
            40,
        )
    }

    #[tokio::test]
    async fn due_rituals_are_claimed_executed_and_rescheduled() {
        let orchestrator = orchestrator();
        orchestrator.ensure_default_rituals().unwrap();
        let completed = orchestrator.run_due_rituals().await.unwrap();
        assert_eq!(completed.len(), 4);
        for ritual in &completed {
            assert_eq!(ritual.status, RitualStatus::Success);
            assert!(ritual.locked_until.is_none());
            assert!(ritual.next_run > Utc::now() - chrono::Duration::seconds(1));
        }
    }

    #[tokio::test]
    async fn a_ritual_not_yet_due_is_not_claimed() {
        let orchestrator = orchestrator();
        orchestrator.ensure_default_rituals().unwrap();
        // Run once so every ritual's next_run moves into the future.
        orchestrator.run_due_rituals().await.unwrap();
        let second_pass = orchestrator.run_due_rituals().await.unwrap();
        assert!(second_pass.is_empty());
    }

    /// Scenario 6 (spec.md §8): two workers racing `claim_due_rituals` on the
    /// same due ritual must not both win the lease.
    #[test]
    fn two_concurrent_claimants_never_both_win_the_lease() {
        let orchestrator = Arc::new(orchestrator());
        orchestrator.ensure_default_rituals().unwrap();

        let a = orchestrator.clone();
        let b = orchestrator.clone();
        let ta = std::thread::spawn(move || a.claim_due_rituals().unwrap());
        let tb = std::thread::spawn(move || b.claim_due_rituals().unwrap());
        let claimed_a = ta.join().unwrap();
        let claimed_b = tb.join().unwrap();

        let ids_a: std::collections::HashSet<i64> = claimed_a.iter().map(|r| r.id).collect();
        let ids_b: std::collections::HashSet<i64> = claimed_b.iter().map(|r| r.id).collect();
        assert!(ids_a.is_disjoint(&ids_b), "both workers claimed the same ritual: {ids_a:?} / {ids_b:?}");
        assert_eq!(ids_a.len() + ids_b.len(), 4);
    }
}
