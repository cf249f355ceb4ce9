//! Core data models used throughout wiki-digest.
//!
//! Persisted records ([`Query`], [`SearchResult`]) mirror the two SQLite
//! tables. The remaining types flow between the pipeline stages and are
//! never stored as-is.

use serde::{Deserialize, Serialize};

/// An inbound question and the topic extracted from it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Query {
    pub id: i64,
    pub original_query: String,
    pub extracted_topic: String,
    pub confidence: f64,
    pub is_ambiguous: bool,
    pub created_at: String, // ISO8601
    pub updated_at: Option<String>,
}

/// A completed pipeline run: the article that was read and its digest.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchResult {
    pub id: i64,
    pub query_id: i64,
    pub wikipedia_url: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    /// False when the article was fabricated by the model fallback.
    pub verified: bool,
    pub created_at: String, // ISO8601
}

/// Output of the topic resolver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicExtraction {
    pub topic: String,
    pub confidence: f64,
    #[serde(default)]
    pub is_ambiguous: bool,
}

/// One candidate interpretation of an ambiguous topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisambiguationOption {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DisambiguationOption {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            description: None,
            confidence: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Candidate interpretations plus the question to put to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisambiguationResult {
    pub options: Vec<DisambiguationOption>,
    pub conversation_prompt: String,
    #[serde(default = "default_true")]
    pub needs_clarification: bool,
}

fn default_true() -> bool {
    true
}

/// Where an [`Article`] came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArticleOrigin {
    /// Returned by a real encyclopedia lookup.
    Confirmed,
    /// Made up by the language model when no lookup succeeded.
    Fabricated,
}

/// An encyclopedia article. `summary` holds the lead section for
/// confirmed articles and the model's text for fabricated ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub origin: ArticleOrigin,
}

impl Article {
    pub fn is_verified(&self) -> bool {
        self.origin == ArticleOrigin::Confirmed
    }
}

/// A bounded-length summary of an article.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Digest {
    pub text: String,
    /// Number of chunks summarized in the map step.
    pub chunk_count: usize,
    /// True when the small-chunk retry produced this digest.
    pub retried: bool,
    /// True when the reduced summary had to be cut to the word limit.
    pub truncated: bool,
}

impl Digest {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}
