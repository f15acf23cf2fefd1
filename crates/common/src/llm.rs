//! Language-model and embedding provider layer.
//!
//! Agents see plain synchronous-looking call-return contracts with per-call
//! deadlines; transient faults are retried here and never reach them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::error::{CoreError, Result};
use crate::retry::{with_retries, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Text,
    Json,
}

/// Routing hint for the hybrid provider: routine steps go to the fast model,
/// final generation to the quality model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTier {
    Routine,
    Quality,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub response_shape: ResponseShape,
    pub temperature: f32,
    pub max_tokens: u32,
    pub deadline: Duration,
    pub tier: CallTier,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            response_shape: ResponseShape::Text,
            temperature: 0.2,
            max_tokens: 8192,
            deadline: Duration::from_secs(600),
            tier: CallTier::Routine,
        }
    }
}

impl ChatOptions {
    pub fn json(mut self) -> Self {
        self.response_shape = ResponseShape::Json;
        self
    }

    pub fn quality(mut self) -> Self {
        self.tier = CallTier::Quality;
        self
    }
}

/// Chat completion contract
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String>;

    fn name(&self) -> &str;
}

/// Batch embedding contract; every vector has the pinned dimension
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

fn map_reqwest(service: &str, err: reqwest::Error) -> CoreError {
    if err.is_timeout() {
        CoreError::Timeout(Duration::from_secs(0))
    } else {
        CoreError::Llm(format!("{service}: {err}"))
    }
}

fn map_status(service: &str, status: reqwest::StatusCode, body: &str) -> CoreError {
    let message = format!("{service}: {}", body.chars().take(500).collect::<String>());
    match status.as_u16() {
        401 | 403 => CoreError::Auth(message),
        429 => CoreError::RateLimited(message),
        code if code >= 500 => CoreError::Upstream {
            status: code,
            message,
        },
        code => CoreError::Llm(format!("unexpected status {code}: {message}")),
    }
}

/// Ollama chat client (`/api/chat`)
pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        if options.response_shape == ResponseShape::Json {
            body["format"] = json!("json");
        }

        let deadline = options.deadline;
        with_retries("ollama", "chat", RetryPolicy::default(), || {
            let request = self.client.post(&url).timeout(deadline).json(&body);
            async move {
                let response = request.send().await.map_err(|e| map_reqwest("ollama", e))?;
                let status = response.status();
                let text = response.text().await.map_err(|e| map_reqwest("ollama", e))?;
                if !status.is_success() {
                    return Err(map_status("ollama", status, &text));
                }
                let value: Value = serde_json::from_str(&text)?;
                value["message"]["content"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| CoreError::Llm("ollama: missing message content".into()))
            }
        })
        .await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// OpenAI-compatible chat client (`/v1/chat/completions`)
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let mut body = json!({
            "model": self.model,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if options.response_shape == ResponseShape::Json {
            body["response_format"] = json!({"type": "json_object"});
        }

        let deadline = options.deadline;
        with_retries("openai", "chat", RetryPolicy::default(), || {
            let request = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .timeout(deadline)
                .json(&body);
            async move {
                let response = request.send().await.map_err(|e| map_reqwest("openai", e))?;
                let status = response.status();
                let text = response.text().await.map_err(|e| map_reqwest("openai", e))?;
                if !status.is_success() {
                    return Err(map_status("openai", status, &text));
                }
                let value: Value = serde_json::from_str(&text)?;
                value["choices"][0]["message"]["content"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| CoreError::Llm("openai: missing message content".into()))
            }
        })
        .await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Routes routine calls to the fast provider, quality calls to the strong one
pub struct HybridChat {
    fast: Arc<dyn ChatModel>,
    quality: Arc<dyn ChatModel>,
}

impl HybridChat {
    pub fn new(fast: Arc<dyn ChatModel>, quality: Arc<dyn ChatModel>) -> Self {
        Self { fast, quality }
    }
}

#[async_trait]
impl ChatModel for HybridChat {
    async fn chat(&self, system: &str, user: &str, options: &ChatOptions) -> Result<String> {
        let provider = match options.tier {
            CallTier::Routine => &self.fast,
            CallTier::Quality => &self.quality,
        };
        debug!(provider = provider.name(), tier = ?options.tier, "hybrid routing");
        provider.chat(system, user, options).await
    }

    fn name(&self) -> &str {
        "hybrid"
    }
}

/// Ollama embedding client (`/api/embed`), dimension-checked
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    deadline: Duration,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.ollama_url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            deadline: Duration::from_secs(config.deadline_secs),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let body = json!({ "model": self.model, "input": texts });

        let embeddings: Vec<Vec<f32>> =
            with_retries("ollama", "embed", RetryPolicy::default(), || {
                let request = self.client.post(&url).timeout(self.deadline).json(&body);
                async move {
                    let response = request.send().await.map_err(|e| map_reqwest("embed", e))?;
                    let status = response.status();
                    let text = response.text().await.map_err(|e| map_reqwest("embed", e))?;
                    if !status.is_success() {
                        return Err(map_status("embed", status, &text));
                    }
                    let value: Value = serde_json::from_str(&text)?;
                    serde_json::from_value(value["embeddings"].clone())
                        .map_err(|e| CoreError::Embedding(format!("malformed embeddings: {e}")))
                }
            })
            .await?;

        if embeddings.len() != texts.len() {
            return Err(CoreError::Embedding(format!(
                "embedder returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        for vector in &embeddings {
            if vector.len() != self.dimension {
                return Err(CoreError::Embedding(format!(
                    "dimension mismatch: got {}, pinned {}",
                    vector.len(),
                    self.dimension
                )));
            }
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Builds the configured chat provider; the set is closed by construction
pub fn chat_model_from_config(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaChat::new(
            &config.ollama_url,
            &config.ollama_model,
        ))),
        "openai" => Ok(Arc::new(OpenAiChat::new(
            &config.openai_url,
            &config.openai_api_key,
            &config.openai_model,
        ))),
        "hybrid" => {
            let fast = Arc::new(OllamaChat::new(&config.ollama_url, &config.ollama_model));
            let quality = Arc::new(OpenAiChat::new(
                &config.openai_url,
                &config.openai_api_key,
                &config.openai_model,
            ));
            Ok(Arc::new(HybridChat::new(fast, quality)))
        }
        other => Err(CoreError::Config(format!("unknown LLM provider: {other}"))),
    }
}

pub fn embedder_from_config(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    Arc::new(OllamaEmbedder::new(config))
}

/// Extract a JSON object from possibly fenced / chatty model output.
pub fn parse_model_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();

    // Happy path: the model obeyed the strict-JSON instruction
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    // Strip markdown code fences
    let without_fences = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.rsplit_once("```").map(|(body, _)| body))
        .map(str::trim);
    if let Some(body) = without_fences {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return Ok(value);
        }
    }

    // Last resort: widest braces span
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(CoreError::ModelOutput(format!(
        "not valid JSON: {}",
        trimmed.chars().take(200).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let value = parse_model_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"strategies\": []}\n```";
        let value = parse_model_json(raw).unwrap();
        assert!(value["strategies"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parses_chatty_json() {
        let raw = "Sure, here is the plan:\n{\"a\": {\"b\": 2}}\nHope that helps!";
        let value = parse_model_json(raw).unwrap();
        assert_eq!(value["a"]["b"], 2);
    }

    #[test]
    fn rejects_non_json() {
        assert!(parse_model_json("no json here").is_err());
    }
}
