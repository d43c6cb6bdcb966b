//! SkillSynthesizer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::EvolutionConfig;
use crate::error::CortexResult;
use crate::journal::ActionJournal;
use crate::model::{Capability, CapabilityStatus};
use crate::ports::{Completer, CompletionRequest, ResponseFormat};

use super::registry::CapabilityRegistry;

const DISCOVERY_FAILURE_LIMIT: usize = 200;
const MIN_FAILURES_PER_TOOL: usize = 3;
const SYNTHESIS_RETRIES: u32 = 3;
/// Reliability an experimental skill must clear before the synthesizer
/// considers it "nearing promotion" and pre-warms its description.
const PROMOTION_RELIABILITY_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Serialize)]
pub struct FailureSample {
    pub arguments: serde_json::Value,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisContext {
    pub target_tool: String,
    pub failures: Vec<FailureSample>,
    pub existing_description: Option<String>,
    pub evolution_config: EvolutionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisResult {
    pub tool: String,
    #[serde(rename = "mutatedDescription")]
    pub mutated_description: String,
    #[serde(rename = "mutatedMetadata", default)]
    pub mutated_metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    Registered(Vec<String>),
    SkippedNoLlm,
}

pub struct SkillSynthesizer {
    clock: Arc<dyn Clock>,
    registry: Arc<CapabilityRegistry>,
    config: EvolutionConfig,
}

impl SkillSynthesizer {
    pub fn new(clock: Arc<dyn Clock>, registry: Arc<CapabilityRegistry>, config: EvolutionConfig) -> Self {
        Self { clock, registry, config }
    }

    #[tracing::instrument(skip(self, journal, completer), target = "cortex::capability")]
    pub async fn discover_and_synthesize(&self, journal: &ActionJournal, completer: Option<&dyn Completer>) -> CortexResult<SynthesisOutcome> {
        let Some(completer) = completer else {
            tracing::warn!(target: "cortex::capability", "synthesis_status=skipped_no_llm");
            return Ok(SynthesisOutcome::SkippedNoLlm);
        };

        let failures = journal.recent_failures(DISCOVERY_FAILURE_LIMIT)?;
        let mut by_tool: HashMap<String, Vec<FailureSample>> = HashMap::new();
        for action in failures {
            by_tool.entry(action.tool_name.clone()).or_default().push(FailureSample {
                arguments: action.arguments,
                error: action.error,
                timestamp: action.created_at,
            });
        }
        by_tool.retain(|_, v| v.len() >= MIN_FAILURES_PER_TOOL);
        if by_tool.is_empty() {
            return Ok(SynthesisOutcome::Registered(Vec::new()));
        }

        let mut by_domain: HashMap<String, Vec<(String, Vec<FailureSample>)>> = HashMap::new();
        for (tool, samples) in by_tool {
            let domain = tool.split('_').next().unwrap_or(&tool).to_string();
            by_domain.entry(domain).or_default().push((tool, samples));
        }

        let mut registered = Vec::new();
        for (_domain, group) in by_domain {
            let contexts: Vec<SynthesisContext> = group
                .into_iter()
                .map(|(target_tool, failures)| SynthesisContext {
                    target_tool,
                    failures,
                    existing_description: None,
                    evolution_config: self.config.clone(),
                })
                .collect();

            let results = if completer.is_fast_tier() && contexts.len() > 1 {
                self.synthesize_batch(completer, &contexts).await?
            } else {
                let mut results = Vec::new();
                for ctx in &contexts {
                    if let Some(result) = self.synthesize_one(completer, ctx).await? {
                        results.push(result);
                    }
                }
                results
            };

            for result in results {
                if self.registry.count_by_status(CapabilityStatus::Experimental)? >= self.config.max_sandbox_skills {
                    self.registry.prune_bottom_experimental(0.2)?;
                }
                let version = format!("1.0.{}", self.clock.now().timestamp());
                self.registry
                    .register_capability(&result.tool, &version, &result.mutated_description, CapabilityStatus::Experimental, None)?;
                registered.push(result.tool);
            }
        }
        Ok(SynthesisOutcome::Registered(registered))
    }

    /// Pre-warm: an experimental skill whose reliability has crossed
    /// [`PROMOTION_RELIABILITY_THRESHOLD`] and has not yet been pre-warmed
    /// gets its description refined via the AI strategy, written back, and
    /// is then promoted to `verified` -- the refinement always lands before
    /// the status transition, per spec.md §4.4. Without a configured
    /// completer the promotion still proceeds, just without refinement.
    #[tracing::instrument(skip(self, completer), target = "cortex::capability")]
    pub async fn prewarm_nearing_promotion(&self, completer: Option<&dyn Completer>) -> CortexResult<Vec<String>> {
        let candidates: Vec<Capability> = self
            .registry
            .all()?
            .into_iter()
            .filter(|c| c.status == CapabilityStatus::Experimental && !c.metadata.prewarmed && c.reliability >= PROMOTION_RELIABILITY_THRESHOLD)
            .collect();

        let mut promoted = Vec::new();
        for capability in candidates {
            if let Some(completer) = completer {
                if let Some(refined) = self.refine_description(completer, &capability).await {
                    self.registry.update_description(capability.id, &refined)?;
                }
            }
            self.registry.transition_status(capability.id, CapabilityStatus::Verified)?;
            tracing::info!(target: "cortex::capability", name = %capability.name, "skill prewarmed and promoted");
            promoted.push(capability.name);
        }
        Ok(promoted)
    }

    async fn refine_description(&self, completer: &dyn Completer, capability: &Capability) -> Option<String> {
        let prompt = format!(
            "Refine the description of the tool `{}` ahead of promoting it out of experimental status. \
             Current description: {}\nRespond with JSON {{tool, mutatedDescription, mutatedMetadata}}.",
            capability.name, capability.description
        );
        match self.complete_with_retry(completer, prompt).await {
            Ok(content) => serde_json::from_str::<SynthesisResult>(&content).ok().map(|r| r.mutated_description),
            Err(_) => None,
        }
    }

    async fn synthesize_batch(&self, completer: &dyn Completer, contexts: &[SynthesisContext]) -> CortexResult<Vec<SynthesisResult>> {
        let prompt = format!(
            "Synthesize improved tool descriptions for the following failing tools. Respond with a JSON array of \
             {{tool, mutatedDescription, mutatedMetadata}}.\n\n{}",
            serde_json::to_string(contexts).unwrap_or_default()
        );
        match self.complete_with_retry(completer, prompt).await {
            Ok(content) => Ok(serde_json::from_str(&content).unwrap_or_default()),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn synthesize_one(&self, completer: &dyn Completer, ctx: &SynthesisContext) -> CortexResult<Option<SynthesisResult>> {
        let prompt = format!(
            "Synthesize an improved description for the failing tool `{}`. Respond with JSON \
             {{tool, mutatedDescription, mutatedMetadata}}.\n\n{}",
            ctx.target_tool,
            serde_json::to_string(ctx).unwrap_or_default()
        );
        match self.complete_with_retry(completer, prompt).await {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(_) => Ok(None),
        }
    }

    /// Retries up to `SYNTHESIS_RETRIES` times with linear backoff via the
    /// injected `Clock`.
    async fn complete_with_retry(&self, completer: &dyn Completer, prompt: String) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = CompletionRequest {
                prompt: prompt.clone(),
                response_format: ResponseFormat::Json,
                temperature: None,
                max_tokens: None,
            };
            match completer.complete(request).await {
                Ok(response) => return Ok(response.content),
                Err(err) if attempt >= SYNTHESIS_RETRIES => return Err(err),
                Err(_) => {
                    self.clock.sleep(Duration::from_millis(250 * attempt as u64)).await;
                }
            }
        }
    }
}
