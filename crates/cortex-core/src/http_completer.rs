//! `HttpCompleter`: a thin OpenAI-compatible chat-completion client
//! implementing the `Completer` port so any OpenAI-compatible endpoint
//! (OpenRouter, a local gateway, etc.) can back the skill synthesizer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ports::{Completer, CompletionRequest, CompletionResponse, CompletionUsage, ResponseFormat};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatWire>,
}

#[derive(Serialize)]
struct ResponseFormatWire {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

/// `Completer` backed by any OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpCompleter {
    api_base: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    fast_tier: bool,
    timeout: Duration,
}

impl HttpCompleter {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let timeout = Duration::from_secs(30);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
            fast_tier: true,
            timeout,
        }
    }

    /// Mark this completer as a slow/premium tier (affects
    /// `SkillSynthesizer::discover_and_synthesize`'s batching decision).
    pub fn premium(mut self) -> Self {
        self.fast_tier = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Completer for HttpCompleter {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, String> {
        let response_format = match req.response_format {
            ResponseFormat::Json => Some(ResponseFormatWire { kind: "json_object" }),
            ResponseFormat::Text => None,
        };
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &req.prompt,
            }],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format,
        };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("completion request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("completion request failed with status {}", resp.status()));
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| format!("completion response decode failed: {e}"))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "completion response had no choices".to_string())?;
        Ok(CompletionResponse {
            content,
            usage: parsed.usage.map(|u| CompletionUsage { total_tokens: u.total_tokens }),
        })
    }

    fn is_fast_tier(&self) -> bool {
        self.fast_tier
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
