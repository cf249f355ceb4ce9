//! Chat model backed by a local Ollama instance.
//!
//! Calls `POST /api/chat` on the configured URL (default
//! `http://localhost:11434`). When the request carries a schema it is passed
//! as Ollama's `format` so the reply is constrained to that JSON shape.

use async_trait::async_trait;
use serde_json::Value;

use super::{build_client, post_with_retry, ChatModel, ChatRequest};
use crate::config::LlmConfig;
use crate::error::LlmError;

pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    timeout_secs: u64,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "options": { "temperature": request.temperature.unwrap_or(self.temperature) },
        });
        if let Some(schema) = &request.schema {
            body["format"] = schema.schema.clone();
        }
        body
    }
}

#[async_trait]
impl ChatModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = self.request_body(request);

        let json = post_with_retry(
            &self.client,
            &url,
            None,
            &body,
            self.max_retries,
            self.timeout_secs,
            "ollama",
        )
        .await
        .map_err(|e| match e {
            LlmError::Network(msg) => LlmError::Network(format!(
                "Ollama connection error (is Ollama running at {}?): {}",
                self.url, msg
            )),
            other => other,
        })?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<String, LlmError> {
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(LlmError::Api {
            status: 200,
            message: err.to_string(),
        });
    }
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::Malformed("Ollama response missing message.content".into()))
}
