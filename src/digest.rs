//! Map-reduce summarization of arbitrarily long article text.
//!
//! The text is split with [`chunk::split_text`](crate::chunk::split_text),
//! each chunk is summarized on its own (map), and the chunk summaries are
//! combined in document order into one digest (reduce). If the model
//! reports a context-length overflow the whole operation is repeated once
//! with smaller chunks. The result is cut to the word limit regardless of
//! what the model returns.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::chunk::split_text;
use crate::config::DigestConfig;
use crate::error::{Component, LlmError, PipelineError, Result};
use crate::llm::{extract, ChatModel, ChatRequest};
use crate::models::Digest;

pub const MAP_SCHEMA: &str = "chunk_summary_v1";
pub const COMBINE_SCHEMA: &str = "digest_v1";

#[derive(Debug, Deserialize)]
struct SummaryReply {
    summary: String,
}

fn summary_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": { "summary": { "type": "string" } },
        "required": ["summary"]
    })
}

pub struct DigestBuilder {
    model: Arc<dyn ChatModel>,
    config: DigestConfig,
}

impl DigestBuilder {
    pub fn new(model: Arc<dyn ChatModel>, config: DigestConfig) -> Self {
        Self { model, config }
    }

    /// Reduces `text` to a digest of at most `max_words` words.
    pub async fn reduce(&self, text: &str) -> Result<Digest> {
        if text.trim().is_empty() {
            return Ok(Digest {
                text: String::new(),
                chunk_count: 0,
                retried: false,
                truncated: false,
            });
        }

        let first = self
            .run(text, self.config.chunk_chars, self.config.chunk_overlap)
            .await;

        match first {
            Ok(digest) => Ok(digest),
            Err(e) if e.is_context_length() => {
                tracing::warn!(
                    chunk_chars = self.config.retry_chunk_chars,
                    "context length exceeded, retrying with smaller chunks"
                );
                let mut digest = self
                    .run(
                        text,
                        self.config.retry_chunk_chars,
                        self.config.retry_chunk_overlap,
                    )
                    .await
                    .map_err(|e| PipelineError::model(Component::DigestBuilder, "summarization", e))?;
                digest.retried = true;
                Ok(digest)
            }
            Err(e) => Err(PipelineError::model(Component::DigestBuilder, "summarization", e)),
        }
    }

    async fn run(&self, text: &str, chunk_chars: usize, overlap: usize) -> std::result::Result<Digest, LlmError> {
        let chunks = split_text(text, chunk_chars, overlap);
        tracing::debug!(chunks = chunks.len(), chunk_chars, "summarizing chunks");

        // Map futures own their inputs: `reduce` must stay `Send` for the
        // HTTP handlers.
        let map_calls: Vec<_> = chunks
            .iter()
            .cloned()
            .map(|chunk| {
                let model = self.model.clone();
                let map_words = self.config.map_words;
                async move { summarize_chunk(model, map_words, chunk).await }
            })
            .collect();
        let summaries: Vec<String> = stream::iter(map_calls)
            .buffered(self.config.map_concurrency.max(1))
            .try_collect()
            .await?;

        let combined = self.combine(&summaries).await?;
        let (text, truncated) = enforce_word_limit(&combined, self.config.max_words);

        Ok(Digest {
            text,
            chunk_count: chunks.len(),
            retried: false,
            truncated,
        })
    }

    async fn combine(&self, summaries: &[String]) -> std::result::Result<String, LlmError> {
        let system = format!(
            "The following are summaries of consecutive parts of one encyclopedia article, in order. \
             Combine them into a single coherent summary of at most {} words. \
             Respond with a JSON object: {{\"summary\": string}}.",
            self.config.max_words
        );
        let request = ChatRequest::new(system, summaries.join("\n\n"))
            .schema(COMBINE_SCHEMA, summary_schema());
        let reply: SummaryReply = extract(self.model.as_ref(), &request).await?;
        Ok(reply.summary.trim().to_string())
    }
}

async fn summarize_chunk(
    model: Arc<dyn ChatModel>,
    map_words: usize,
    chunk: String,
) -> std::result::Result<String, LlmError> {
    let system = format!(
        "Summarize the following part of an encyclopedia article in at most {} words. \
         Keep names, dates and key facts. Respond with a JSON object: {{\"summary\": string}}.",
        map_words
    );
    let request = ChatRequest::new(system, chunk).schema(MAP_SCHEMA, summary_schema());
    let reply: SummaryReply = extract(model.as_ref(), &request).await?;
    Ok(reply.summary.trim().to_string())
}

/// Keeps the first `max_words` words and appends `...` when anything was
/// cut. Returns the text and whether it was cut.
pub fn enforce_word_limit(text: &str, max_words: usize) -> (String, bool) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return (text.trim().to_string(), false);
    }
    (format!("{}...", words[..max_words].join(" ")), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FnModel;

    fn summary(words: usize) -> String {
        let text = vec!["word"; words].join(" ");
        serde_json::json!({ "summary": text }).to_string()
    }

    fn builder(model: Arc<FnModel>) -> DigestBuilder {
        DigestBuilder::new(model, DigestConfig::default())
    }

    fn article(chars: usize) -> String {
        let sentence = "Meryl Streep is an American actress known for her versatility. ";
        sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
    }

    #[test]
    fn test_word_limit() {
        let (text, cut) = enforce_word_limit("a b c", 5);
        assert_eq!(text, "a b c");
        assert!(!cut);

        let long = vec!["w"; 310].join(" ");
        let (text, cut) = enforce_word_limit(&long, 300);
        assert!(cut);
        assert!(text.ends_with("w..."));
        assert_eq!(text.split_whitespace().count(), 300);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_reduce_future_is_send() {
        let b = builder(Arc::new(FnModel::fixed("unused")));
        let text = String::from("some text");
        let fut = b.reduce(&text);
        assert_send(&fut);
    }

    #[tokio::test]
    async fn test_map_concurrency_runs_on_spawned_task() {
        let model = Arc::new(FnModel::fixed(&summary(10)));
        let config = DigestConfig {
            map_concurrency: 3,
            ..DigestConfig::default()
        };
        let b = Arc::new(DigestBuilder::new(model.clone(), config));
        let text = article(7_000);
        let digest = tokio::spawn(async move { b.reduce(&text).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(model.schema_calls(MAP_SCHEMA), digest.chunk_count);
        assert!(digest.chunk_count >= 4);
    }

    #[tokio::test]
    async fn test_blank_input_skips_model() {
        let model = Arc::new(FnModel::fixed("unused"));
        let digest = builder(model.clone()).reduce("   \n").await.unwrap();
        assert!(digest.text.is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_long_article_stays_within_limit() {
        let model = Arc::new(FnModel::new(|req| {
            Ok(if req.schema_name() == COMBINE_SCHEMA {
                summary(450)
            } else {
                summary(80)
            })
        }));
        let digest = builder(model.clone()).reduce(&article(50_000)).await.unwrap();
        assert!(digest.word_count() <= 300);
        assert!(digest.truncated);
        assert!(digest.chunk_count >= 25);
        assert_eq!(model.schema_calls(MAP_SCHEMA), digest.chunk_count);
        assert_eq!(model.schema_calls(COMBINE_SCHEMA), 1);
    }

    #[tokio::test]
    async fn test_combines_in_document_order() {
        let model = Arc::new(FnModel::new(|req| {
            if req.schema_name() == MAP_SCHEMA {
                let first = req.user.split_whitespace().next().unwrap_or("").to_string();
                Ok(serde_json::json!({ "summary": first }).to_string())
            } else {
                Ok(serde_json::json!({ "summary": req.user.replace("\n\n", " ") }).to_string())
            }
        }));
        let config = DigestConfig {
            chunk_chars: 20,
            chunk_overlap: 0,
            map_concurrency: 4,
            ..DigestConfig::default()
        };
        let builder = DigestBuilder::new(model, config);

        let digest = builder
            .reduce("Alpha alpha alpha.\n\nBravo bravo bravo.\n\nCharlie charlie.")
            .await
            .unwrap();
        assert_eq!(digest.text, "Alpha Bravo Charlie");
        assert_eq!(digest.chunk_count, 3);
    }

    #[tokio::test]
    async fn test_context_length_retry_uses_smaller_chunks() {
        let model = Arc::new(FnModel::new(|req| {
            if req.user.chars().count() > 1500 {
                Err(LlmError::ContextLengthExceeded("too long".into()))
            } else {
                Ok(summary(20))
            }
        }));
        let digest = builder(model).reduce(&article(5_000)).await.unwrap();
        assert!(digest.retried);
        assert!(digest.chunk_count >= 5);
    }

    #[tokio::test]
    async fn test_second_overflow_is_fatal() {
        let model = Arc::new(FnModel::new(|_| {
            Err(LlmError::ContextLengthExceeded("always".into()))
        }));
        let err = builder(model.clone()).reduce(&article(3_000)).await.unwrap_err();
        assert_eq!(err.component(), Component::DigestBuilder);
        assert!(err.llm_error().map_or(false, |e| e.is_context_length()));
        // One map call per attempt before the error short-circuits.
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_idempotent_length() {
        let model = Arc::new(FnModel::fixed(&summary(120)));
        let b = builder(model);
        let text = article(12_000);
        let a = b.reduce(&text).await.unwrap();
        let c = b.reduce(&text).await.unwrap();
        assert_eq!(a.text.len(), c.text.len());
        assert!(a.word_count() <= 300);
    }
}
