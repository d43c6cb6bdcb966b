//! Capability ports: AI completion and embedding
//! are injected dependencies, modeled as traits over variants rather than
//! global singletons.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Requested response shape for a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ResponseFormat {
    fn default() -> Self {
        ResponseFormat::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompletionUsage {
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

/// The `Completer` capability. Optional: its absence degrades
/// the skill-synthesis path gracefully (synthesis emits
/// `synthesis_status = skipped_no_llm` and registers nothing).
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, String>;

    /// True when this tier can answer fast enough for batched synthesis
    /// prompts. Slower/premium tiers return false and
    /// the synthesizer falls back to one call per tool.
    fn is_fast_tier(&self) -> bool {
        true
    }

    /// Per-request timeout budget.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// A `Completer` that always fails — represents "no AI provider configured."
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCompleter;

#[async_trait]
impl Completer for NullCompleter {
    async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, String> {
        Err("no completer configured".to_string())
    }
}

/// The `Embedder` capability. If absent, similarity degrades to
/// the built-in Jaccard-style token metric (see `knowledge::similarity`).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// The evolution-layer hook the Ritual Orchestrator's `optimization` dispatch
/// calls into. `cortex-core` cannot depend on `cortex-evolution` without a
/// circular dependency, so the Strategic Planner / Evolutionary Pilot are
/// exposed back to the Ritual Orchestrator only through this trait object,
/// implemented by `cortex_evolution::EvolutionaryPilot`.
#[async_trait]
pub trait EvolutionHook: Send + Sync {
    /// Runs the top-level closed loop: observe metrics, dispatch mutation or
    /// a compression ritual as thresholds warrant, then audit.
    async fn run_self_improvement_cycle(&self) -> Result<(), String>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_completer_errors() {
        let c = NullCompleter;
        let res = c
            .complete(CompletionRequest {
                prompt: "hi".into(),
                response_format: ResponseFormat::Text,
                temperature: None,
                max_tokens: None,
            })
            .await;
        assert!(res.is_err());
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
