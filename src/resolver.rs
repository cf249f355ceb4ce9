//! Topic extraction with a bias toward asking rather than guessing.
//!
//! The model scores how unambiguous the extracted topic is. A bare name or
//! one-word topic ("Meryl", "Washington", "Python") is always held below
//! the confidence threshold, whatever the model says, so it goes through
//! disambiguation instead of being resolved to the most popular reading.

use serde::Deserialize;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::error::{Component, LlmError, PipelineError, Result};
use crate::llm::{extract, ChatModel, ChatRequest};
use crate::models::TopicExtraction;

pub const SCHEMA_NAME: &str = "topic_extraction_v1";

const SYSTEM_PROMPT: &str = "You are a topic extraction expert. Your task is to:
1. Extract the main topic from the user's query.
2. Decide whether the topic is ambiguous.
3. Score your confidence that the topic is unambiguous between 0 and 1.

If the query is ambiguous, the confidence MUST be below 0.7, even if one interpretation seems dominant.
A query that is a single name such as \"meryl\", \"washington\" or \"python\", or anything else that can refer
to several people or things, must get a low score such as 0.4 or 0.5 regardless of how well known one
interpretation is. Also use a low score when the topic is not clearly defined.

Respond with a JSON object: {\"topic\": string, \"confidence\": number, \"is_ambiguous\": boolean}.";

/// Leading phrases that carry no topic information.
const LEAD_INS: &[&str] = &[
    "tell me about",
    "tell me more about",
    "what do you know about",
    "information about",
    "info on",
    "search for",
    "look up",
    "who is",
    "who was",
    "who are",
    "what is",
    "what was",
    "what are",
    "who's",
    "what's",
    "about",
];

#[derive(Debug, Deserialize)]
struct RawExtraction {
    topic: String,
    confidence: f64,
    #[serde(default)]
    is_ambiguous: bool,
}

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "topic": { "type": "string", "description": "The main topic extracted from the query" },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "is_ambiguous": { "type": "boolean" }
        },
        "required": ["topic", "confidence", "is_ambiguous"]
    })
}

pub struct TopicResolver {
    model: Arc<dyn ChatModel>,
    config: ResolverConfig,
}

impl TopicResolver {
    pub fn new(model: Arc<dyn ChatModel>, config: ResolverConfig) -> Self {
        Self { model, config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.confidence_threshold
    }

    /// Extracts the topic and a confidence score from free text.
    ///
    /// A malformed reply is a hard failure; there is no retry.
    pub async fn extract(&self, query: &str) -> Result<TopicExtraction> {
        let request = ChatRequest::new(SYSTEM_PROMPT, query)
            .temperature(0.0)
            .schema(SCHEMA_NAME, schema());

        let raw: RawExtraction = extract(self.model.as_ref(), &request)
            .await
            .map_err(|e| PipelineError::model(Component::TopicResolver, "topic_extraction", e))?;

        let topic = raw.topic.trim().to_string();
        if topic.is_empty() {
            return Err(malformed("empty topic"));
        }
        if !raw.confidence.is_finite() {
            return Err(malformed("confidence is not a number"));
        }

        let mut extraction = TopicExtraction {
            topic,
            confidence: raw.confidence.clamp(0.0, 1.0),
            is_ambiguous: raw.is_ambiguous,
        };

        if is_bare_name(query) {
            extraction.confidence = extraction.confidence.min(self.config.bare_name_cap);
            extraction.is_ambiguous = true;
        }

        tracing::debug!(
            topic = %extraction.topic,
            confidence = extraction.confidence,
            ambiguous = extraction.is_ambiguous,
            "topic extracted"
        );
        Ok(extraction)
    }

    pub fn needs_disambiguation(&self, extraction: &TopicExtraction) -> bool {
        extraction.confidence < self.config.confidence_threshold
    }
}

fn malformed(msg: &str) -> PipelineError {
    PipelineError::model(
        Component::TopicResolver,
        "topic_extraction",
        LlmError::Malformed(msg.to_string()),
    )
}

/// True when the query, stripped of lead-in phrases, articles and
/// punctuation, is a single word.
pub fn is_bare_name(query: &str) -> bool {
    let mut rest = query.trim().to_lowercase();

    loop {
        let before = rest.len();
        for lead in LEAD_INS {
            if let Some(stripped) = rest.strip_prefix(lead) {
                if stripped.is_empty() || stripped.starts_with(char::is_whitespace) {
                    rest = stripped.trim_start().to_string();
                }
            }
        }
        for article in ["the ", "a ", "an "] {
            if let Some(stripped) = rest.strip_prefix(article) {
                rest = stripped.trim_start().to_string();
            }
        }
        if rest.len() == before {
            break;
        }
    }

    let words: Vec<&str> = rest
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect();
    words.len() == 1
}
