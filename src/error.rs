//! Error types for the pipeline and its external collaborators.
//!
//! Every fatal error that reaches a caller is a [`PipelineError`], which
//! names the [`Component`] and the operation that produced it.

use std::fmt;
use thiserror::Error;

/// Failures reported by a language-model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing API key or unusable provider settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection failure after all retries.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not finish within the configured timeout.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Non-success response that is not a context-length failure.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The prompt did not fit into the model's context window.
    #[error("context_length_exceeded: {0}")]
    ContextLengthExceeded(String),

    /// The response did not match the requested output schema.
    #[error("malformed model output: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn is_context_length(&self) -> bool {
        matches!(self, LlmError::ContextLengthExceeded(_))
    }
}

/// Failures reported by the encyclopedia source.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Malformed(String),
}

/// The logical component an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    TopicResolver,
    Disambiguator,
    KnowledgeRetriever,
    DigestBuilder,
    Store,
    Pipeline,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::TopicResolver => "TopicResolver",
            Component::Disambiguator => "Disambiguator",
            Component::KnowledgeRetriever => "KnowledgeRetriever",
            Component::DigestBuilder => "DigestBuilder",
            Component::Store => "Store",
            Component::Pipeline => "Pipeline",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal pipeline failure, tagged with where it happened.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{component} failed during {operation}: {source}")]
    Model {
        component: Component,
        operation: &'static str,
        source: LlmError,
    },

    /// Lookup, fuzzy search and the model fallback all failed.
    #[error("failed to find an article for '{topic}': {cause}. LLM fallback also failed: {source}")]
    Unresolved {
        topic: String,
        cause: String,
        source: LlmError,
    },

    #[error("could not retrieve content for {url}")]
    ContentNotFound { url: String },

    #[error("store failed during {operation}: {source}")]
    Store {
        operation: &'static str,
        source: sqlx::Error,
    },

    #[error("query not found: {0}")]
    QueryNotFound(i64),

    #[error("{0}")]
    InvalidInput(String),
}

impl PipelineError {
    pub fn model(component: Component, operation: &'static str, source: LlmError) -> Self {
        PipelineError::Model {
            component,
            operation,
            source,
        }
    }

    pub fn store(operation: &'static str, source: sqlx::Error) -> Self {
        PipelineError::Store { operation, source }
    }

    pub fn component(&self) -> Component {
        match self {
            PipelineError::Model { component, .. } => *component,
            PipelineError::Unresolved { .. } | PipelineError::ContentNotFound { .. } => {
                Component::KnowledgeRetriever
            }
            PipelineError::Store { .. } | PipelineError::QueryNotFound(_) => Component::Store,
            PipelineError::InvalidInput(_) => Component::Pipeline,
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            PipelineError::Model { operation, .. } => operation,
            PipelineError::Unresolved { .. } => "search",
            PipelineError::ContentNotFound { .. } => "fetch_full_text",
            PipelineError::Store { operation, .. } => operation,
            PipelineError::QueryNotFound(_) => "get_query",
            PipelineError::InvalidInput(_) => "validate",
        }
    }

    /// The model error underneath, if any.
    pub fn llm_error(&self) -> Option<&LlmError> {
        match self {
            PipelineError::Model { source, .. } | PipelineError::Unresolved { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.llm_error(), Some(LlmError::Timeout(_)))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
