//! Language-model provider abstraction and implementations.
//!
//! Defines the [`ChatModel`] trait and concrete implementations:
//! - **[`OpenAIModel`]**: calls an OpenAI-compatible `/chat/completions`
//!   endpoint, asking for JSON that matches the request's schema.
//! - **[`OllamaModel`]**: calls a local Ollama instance's `/api/chat` endpoint.
//!
//! Every pipeline component talks to the model through a [`ChatRequest`]:
//! a system prompt, a user prompt, an optional temperature and an optional
//! named [`OutputSchema`]. Schemas are versioned by name
//! (e.g. `topic_extraction_v1`) so a response shape never changes silently.
//!
//! # Retry Strategy
//!
//! Both providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - context-length failures → fail immediately with
//!   [`LlmError::ContextLengthExceeded`] so the caller can re-chunk
//! - other HTTP 4xx → fail immediately
//! - network errors → retry; timeouts → fail immediately
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

mod ollama;

pub use ollama::OllamaModel;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// A named JSON schema the response must conform to.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub schema: Value,
}

/// One structured prompt: system + user message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    /// Overrides the provider's configured temperature.
    pub temperature: Option<f32>,
    pub schema: Option<OutputSchema>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            schema: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn schema(mut self, name: &'static str, schema: Value) -> Self {
        self.schema = Some(OutputSchema { name, schema });
        self
    }

    /// The schema name, or `"text"` for free-form requests.
    pub fn schema_name(&self) -> &str {
        self.schema.as_ref().map(|s| s.name).unwrap_or("text")
    }
}

/// A hosted or local chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-3.5-turbo"`).
    fn model_name(&self) -> &str;

    /// Sends one request and returns the assistant message text.
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Sends a request and deserializes the JSON answer into `T`.
pub async fn extract<T: DeserializeOwned>(
    model: &dyn ChatModel,
    request: &ChatRequest,
) -> Result<T, LlmError> {
    let raw = model.complete(request).await?;
    parse_json(&raw).map_err(|e| {
        LlmError::Malformed(format!("{} response: {}", request.schema_name(), e))
    })
}

/// Parses a JSON object out of a model reply, tolerating code fences and
/// prose around the object.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let trimmed = raw.trim();
    if let Ok(v) = serde_json::from_str(trimmed) {
        return Ok(v);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => {
            serde_json::from_str(&trimmed[s..=e]).map_err(|e| e.to_string())
        }
        _ => Err(format!(
            "no JSON object in reply: {}",
            trimmed.chars().take(120).collect::<String>()
        )),
    }
}

/// Instantiates the provider named in `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, LlmError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => Err(LlmError::Config(format!("unknown llm provider: {}", other))),
    }
}

/// True when an error body describes an oversized prompt.
pub(crate) fn is_context_length_error(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || lower.contains("context window")
}

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Config(e.to_string()))
}

/// POSTs `body` to `url`, retrying transient failures with backoff.
pub(crate) async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    timeout_secs: u64,
    provider: &str,
) -> Result<Value, LlmError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, ?delay, "retrying model call");
            tokio::time::sleep(delay).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| LlmError::Malformed(format!("{} body: {}", provider, e)));
                }

                let body_text = response.text().await.unwrap_or_default();

                if is_context_length_error(&body_text) {
                    return Err(LlmError::ContextLengthExceeded(body_text));
                }

                let err = LlmError::Api {
                    status: status.as_u16(),
                    message: body_text,
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(provider, status = status.as_u16(), "transient model error");
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) if e.is_timeout() => return Err(LlmError::Timeout(timeout_secs)),
            Err(e) => {
                tracing::warn!(provider, error = %e, "model connection error");
                last_err = Some(LlmError::Network(format!("{} ({})", e, url)));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| LlmError::Network("model call failed after retries".into())))
}

// ============ OpenAI Provider ============

/// Chat model backed by the OpenAI API (or any compatible endpoint).
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAIModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Config("OPENAI_API_KEY environment variable not set".into()))?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });

        if let Some(schema) = &request.schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": false,
                }
            });
        }

        body
    }
}

#[async_trait]
impl ChatModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request_body(request);

        let json = post_with_retry(
            &self.client,
            &url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout_secs,
            "openai",
        )
        .await?;

        parse_openai_response(&json)
    }
}

/// Extracts `choices[0].message.content` from a chat completion.
fn parse_openai_response(json: &Value) -> Result<String, LlmError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::Malformed("OpenAI response missing choices[0].message.content".into()))
}
