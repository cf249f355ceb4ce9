//! Topic → encyclopedia article resolution.
//!
//! Tries progressively looser strategies and stops at the first success:
//! exact title, first candidate of a disambiguation page, a fuzzy search
//! over spelling variants, and finally a model-written stand-in article
//! that is marked [`ArticleOrigin::Fabricated`].

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{LlmError, PipelineError, Result};
use crate::llm::{extract, ChatModel, ChatRequest};
use crate::models::{Article, ArticleOrigin};
use crate::wiki::{title_from_url, Encyclopedia, LookupOutcome};

pub const FALLBACK_SCHEMA: &str = "article_fallback_v1";

const FALLBACK_PROMPT: &str = "No encyclopedia article could be found for the topic below.
Write a short factual summary of the topic as an encyclopedia would, give it a title, and give the
URL where the corresponding Wikipedia article would be.

Respond with a JSON object: {\"title\": string, \"summary\": string, \"url\": string}.";

#[derive(Debug, Deserialize)]
struct FallbackArticle {
    title: String,
    summary: String,
    url: String,
}

fn fallback_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "summary": { "type": "string" },
            "url": { "type": "string" }
        },
        "required": ["title", "summary", "url"]
    })
}

pub struct KnowledgeRetriever {
    wiki: Arc<dyn Encyclopedia>,
    model: Arc<dyn ChatModel>,
    max_results: usize,
}

impl KnowledgeRetriever {
    pub fn new(wiki: Arc<dyn Encyclopedia>, model: Arc<dyn ChatModel>, max_results: usize) -> Self {
        Self {
            wiki,
            model,
            max_results,
        }
    }

    /// Maps a topic to an article.
    ///
    /// Fails only when every lookup strategy and the model fallback fail;
    /// the error then carries both causes.
    pub async fn resolve(&self, topic: &str) -> Result<Article> {
        let cause = match self.exact_or_first_candidate(topic).await {
            Ok(article) => return Ok(article),
            Err(cause) => cause,
        };
        tracing::debug!(topic, cause = %cause, "exact lookup failed, trying fuzzy search");

        if let Some(article) = self.fuzzy(topic).await {
            return Ok(article);
        }
        let cause = format!("{}; no article matched any search variant", cause);
        tracing::info!(topic, "no encyclopedia match, asking the model");

        match self.fabricate(topic).await {
            Ok(article) => {
                tracing::warn!(topic, title = %article.title, "using fabricated article");
                Ok(article)
            }
            Err(source) => Err(PipelineError::Unresolved {
                topic: topic.to_string(),
                cause,
                source,
            }),
        }
    }

    /// Full plain text of the article at `url`. Every failure is logged and
    /// reported as `None`.
    pub async fn fetch_full_text(&self, url: &str) -> Option<String> {
        let title = match title_from_url(url) {
            Some(t) => t,
            None => {
                tracing::warn!(url, "cannot derive an article title from url");
                return None;
            }
        };

        match self.wiki.content(&title).await {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                tracing::warn!(url, title = %title, "article has no content");
                None
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "failed to fetch article content");
                None
            }
        }
    }

    /// Steps 1 and 2: the exact title, or the first candidate when the
    /// title is a disambiguation page. Returns the reason on failure.
    async fn exact_or_first_candidate(&self, topic: &str) -> std::result::Result<Article, String> {
        match self.wiki.lookup(topic, true).await {
            Ok(LookupOutcome::Found(article)) => Ok(article),
            Ok(LookupOutcome::NotFound) => Err(format!("no article titled '{}'", topic)),
            Err(e) => Err(format!("lookup of '{}' failed: {}", topic, e)),
            Ok(LookupOutcome::Ambiguous(candidates)) => {
                let first = match candidates.first() {
                    Some(f) => f,
                    None => return Err(format!("'{}' is ambiguous with no candidates", topic)),
                };
                tracing::debug!(topic, candidate = %first, "ambiguous title, taking first candidate");
                match self.wiki.lookup(first, true).await {
                    Ok(LookupOutcome::Found(article)) => Ok(article),
                    Ok(LookupOutcome::Ambiguous(_)) => {
                        Err(format!("'{}' and its first candidate '{}' are ambiguous", topic, first))
                    }
                    Ok(LookupOutcome::NotFound) => {
                        Err(format!("'{}' is ambiguous and '{}' was not found", topic, first))
                    }
                    Err(e) => Err(format!("lookup of '{}' failed: {}", first, e)),
                }
            }
        }
    }

    /// Step 3: search each variant and look every hit up exactly.
    async fn fuzzy(&self, topic: &str) -> Option<Article> {
        let mut tried = HashSet::new();
        let mut found: Vec<Article> = Vec::new();

        for variant in variants(topic) {
            let hits = match self.wiki.search(&variant, self.max_results).await {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(variant = %variant, error = %e, "search failed");
                    continue;
                }
            };

            for hit in hits {
                if !tried.insert(hit.clone()) {
                    continue;
                }
                match self.wiki.lookup(&hit, true).await {
                    Ok(LookupOutcome::Found(article)) => {
                        if !found.iter().any(|a| a.title == article.title) {
                            found.push(article);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(hit = %hit, error = %e, "lookup of search hit failed"),
                }
            }
        }

        if !found.is_empty() {
            tracing::debug!(topic, matches = found.len(), "fuzzy search matched");
        }
        found.into_iter().next()
    }

    /// Step 4: ask the model for a stand-in article.
    async fn fabricate(&self, topic: &str) -> std::result::Result<Article, LlmError> {
        let request = ChatRequest::new(FALLBACK_PROMPT, format!("Topic: {}", topic))
            .schema(FALLBACK_SCHEMA, fallback_schema());
        let raw: FallbackArticle = extract(self.model.as_ref(), &request).await?;

        let title = raw.title.trim();
        let summary = raw.summary.trim();
        let url = raw.url.trim();
        if title.is_empty() || summary.is_empty() || url.is_empty() {
            return Err(LlmError::Malformed(format!(
                "{} response has empty fields",
                FALLBACK_SCHEMA
            )));
        }

        Ok(Article {
            title: title.to_string(),
            url: url.to_string(),
            summary: summary.to_string(),
            origin: ArticleOrigin::Fabricated,
        })
    }
}

/// Spelling variants tried by the fuzzy pass, without duplicates:
/// as given, spaces as underscores, lower case, title case.
pub fn variants(topic: &str) -> Vec<String> {
    let topic = topic.trim();
    let candidates = [
        topic.to_string(),
        topic.replace(' ', "_"),
        topic.to_lowercase(),
        title_case(topic),
    ];

    let mut out: Vec<String> = Vec::new();
    for c in candidates {
        if !c.is_empty() && !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

/// Capitalizes the first letter of every word and lowercases the rest.
pub fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
