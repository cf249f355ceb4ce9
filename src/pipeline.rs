//! Request orchestration across the four pipeline components.
//!
//! A query moves through the components in a fixed order:
//!
//! ```text
//! process ─▶ TopicResolver ─┬─ confident ───────────────▶ KnowledgeRetriever ─▶ DigestBuilder ─▶ success
//!                           └─ low confidence ─▶ Disambiguator
//!                                                 │  (one or more round trips via `disambiguate`)
//!                                                 └─ settled topic ─▶ KnowledgeRetriever ─▶ …
//! ```
//!
//! Every operation returns an [`Outcome`] tagged with a `status`. Nothing
//! about an open clarification is held in memory between requests: the
//! query row carries the topic, and the options are either echoed back by
//! the client or generated again.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::digest::DigestBuilder;
use crate::disambiguation::{Disambiguator, Resolution};
use crate::error::{PipelineError, Result};
use crate::llm::{self, ChatModel};
use crate::models::{Article, ArticleOrigin, DisambiguationOption, DisambiguationResult, Query};
use crate::resolver::TopicResolver;
use crate::retriever::KnowledgeRetriever;
use crate::store::Store;
use crate::wiki::{title_from_url, Encyclopedia, MediaWiki};

/// Where a request ended up.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The topic is ambiguous; the user should pick one of `options`.
    NeedsDisambiguation {
        query_id: i64,
        extracted_topic: String,
        confidence: f64,
        options: Vec<DisambiguationOption>,
        conversation_prompt: String,
    },
    /// The last reply did not settle the topic.
    NeedsClarification {
        query_id: i64,
        message: String,
        options: Vec<DisambiguationOption>,
    },
    /// An article was found; the user confirms it by sending back its URL.
    NeedsConfirmation {
        query_id: i64,
        topic: String,
        candidates: Vec<Article>,
    },
    Success {
        query_id: i64,
        result_id: i64,
        selected_topic: String,
        title: String,
        url: String,
        summary: String,
        verified: bool,
        content_length: usize,
    },
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::NeedsDisambiguation { .. } => "needs_disambiguation",
            Outcome::NeedsClarification { .. } => "needs_clarification",
            Outcome::NeedsConfirmation { .. } => "needs_confirmation",
            Outcome::Success { .. } => "success",
        }
    }

    pub fn query_id(&self) -> i64 {
        match self {
            Outcome::NeedsDisambiguation { query_id, .. }
            | Outcome::NeedsClarification { query_id, .. }
            | Outcome::NeedsConfirmation { query_id, .. }
            | Outcome::Success { query_id, .. } => *query_id,
        }
    }
}

pub struct Pipeline {
    resolver: TopicResolver,
    disambiguator: Disambiguator,
    retriever: KnowledgeRetriever,
    digester: DigestBuilder,
    store: Store,
    require_confirmation: bool,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn ChatModel>,
        wiki: Arc<dyn Encyclopedia>,
        store: Store,
        config: &Config,
    ) -> Self {
        Self {
            resolver: TopicResolver::new(model.clone(), config.resolver.clone()),
            disambiguator: Disambiguator::new(
                model.clone(),
                config.disambiguation.selection_fallback,
            ),
            retriever: KnowledgeRetriever::new(
                wiki,
                model.clone(),
                config.encyclopedia.max_results,
            ),
            digester: DigestBuilder::new(model, config.digest.clone()),
            store,
            require_confirmation: config.pipeline.require_confirmation,
        }
    }

    /// Builds the production pipeline: configured model provider, MediaWiki
    /// client, and a migrated SQLite store.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let model = llm::create_model(&config.llm)?;
        let wiki: Arc<dyn Encyclopedia> = Arc::new(MediaWiki::new(&config.encyclopedia)?);
        let store = Store::open(config).await?;
        tracing::info!(
            provider = %config.llm.provider,
            model = model.model_name(),
            encyclopedia = %config.encyclopedia.api_url(),
            "pipeline ready"
        );
        Ok(Self::new(model, wiki, store, config))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Handles a new free-text query.
    pub async fn process(&self, query: &str) -> Result<Outcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::InvalidInput("query must not be empty".into()));
        }

        let extraction = self.resolver.extract(query).await?;
        let record = self.store.insert_query(query, &extraction).await?;
        tracing::info!(
            query_id = record.id,
            topic = %extraction.topic,
            confidence = extraction.confidence,
            "query recorded"
        );

        if self.resolver.needs_disambiguation(&extraction) {
            let result = self.disambiguator.generate(&extraction.topic, query).await?;
            return Ok(Outcome::NeedsDisambiguation {
                query_id: record.id,
                extracted_topic: extraction.topic,
                confidence: extraction.confidence,
                options: result.options,
                conversation_prompt: result.conversation_prompt,
            });
        }

        self.proceed(&record, &extraction.topic).await
    }

    /// Interprets a reply to a disambiguation question.
    ///
    /// `options` are the options the client was shown; when absent they
    /// are generated again from the stored topic.
    pub async fn disambiguate(
        &self,
        query_id: i64,
        reply: &str,
        options: Option<Vec<DisambiguationOption>>,
    ) -> Result<Outcome> {
        let record = self.store.require_query(query_id).await?;

        let result = match options.filter(|o| !o.is_empty()) {
            Some(options) => DisambiguationResult {
                options,
                conversation_prompt: format!(
                    "Which of these did you mean by \"{}\"?",
                    record.extracted_topic
                ),
                needs_clarification: true,
            },
            None => {
                self.disambiguator
                    .generate(&record.extracted_topic, &record.original_query)
                    .await?
            }
        };

        let (topic, confidence) = match self.disambiguator.resolve(&result, reply).await? {
            Resolution::Selected(option) => {
                let confidence = option.confidence.unwrap_or(1.0);
                (option.topic, confidence)
            }
            Resolution::NewTopic(topic) => (topic, 1.0),
            Resolution::NeedsMoreInput { question } => {
                tracing::info!(query_id, "reply did not settle the topic");
                return Ok(Outcome::NeedsClarification {
                    query_id,
                    message: question,
                    options: result.options,
                });
            }
        };

        tracing::info!(query_id, topic = %topic, "topic settled");
        let record = self
            .store
            .update_topic(query_id, &topic, confidence, false)
            .await?;
        self.proceed(&record, &topic).await
    }

    /// Confirms an article URL, or refines the query with more text.
    pub async fn confirm(&self, query_id: i64, selection: &str) -> Result<Outcome> {
        let record = self.store.require_query(query_id).await?;
        let selection = selection.trim();
        if selection.is_empty() {
            return Err(PipelineError::InvalidInput("selection must not be empty".into()));
        }

        if selection.starts_with("http") {
            let (article, content) = self.confirmed_article(&record, selection).await?;
            let topic = record.extracted_topic.clone();
            return self.summarize(&record, &topic, &article, content).await;
        }

        let combined = format!("{} {}", record.original_query, selection);
        let extraction = self.resolver.extract(&combined).await?;
        let record = self
            .store
            .update_refinement(query_id, &combined, &extraction)
            .await?;
        tracing::info!(query_id, topic = %extraction.topic, "query refined");

        match self.retriever.resolve(&extraction.topic).await {
            Ok(article) => Ok(Outcome::NeedsConfirmation {
                query_id: record.id,
                topic: extraction.topic,
                candidates: vec![article],
            }),
            Err(e @ PipelineError::Unresolved { .. }) => {
                tracing::info!(query_id, error = %e, "refined topic not found");
                Ok(Outcome::NeedsClarification {
                    query_id: record.id,
                    message: format!(
                        "I couldn't find an article about \"{}\". Could you rephrase or add more detail?",
                        extraction.topic
                    ),
                    options: Vec::new(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// The article behind a confirmed URL and the text to digest.
    ///
    /// A URL with no fetchable page is accepted only when it is the
    /// fabricated candidate for the stored topic; its summary then stands in
    /// for the content and the article stays unverified.
    async fn confirmed_article(&self, record: &Query, url: &str) -> Result<(Article, String)> {
        if let Some(content) = self.retriever.fetch_full_text(url).await {
            let article = Article {
                title: title_from_url(url).unwrap_or_else(|| record.extracted_topic.clone()),
                url: url.to_string(),
                summary: String::new(),
                origin: ArticleOrigin::Confirmed,
            };
            return Ok((article, content));
        }

        match self.retriever.resolve(&record.extracted_topic).await {
            Ok(article) if article.origin == ArticleOrigin::Fabricated && article.url == url => {
                tracing::info!(query_id = record.id, url, "confirming fabricated article");
                let content = article.summary.clone();
                Ok((article, content))
            }
            Ok(_) | Err(PipelineError::Unresolved { .. }) => Err(PipelineError::ContentNotFound {
                url: url.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Continues with a settled topic.
    async fn proceed(&self, record: &Query, topic: &str) -> Result<Outcome> {
        let article = self.retriever.resolve(topic).await?;

        if self.require_confirmation {
            return Ok(Outcome::NeedsConfirmation {
                query_id: record.id,
                topic: topic.to_string(),
                candidates: vec![article],
            });
        }

        let content = match self.retriever.fetch_full_text(&article.url).await {
            Some(text) => text,
            None if article.origin == ArticleOrigin::Fabricated => article.summary.clone(),
            None => {
                return Err(PipelineError::ContentNotFound {
                    url: article.url.clone(),
                })
            }
        };
        self.summarize(record, topic, &article, content).await
    }

    async fn summarize(
        &self,
        record: &Query,
        topic: &str,
        article: &Article,
        content: String,
    ) -> Result<Outcome> {
        let digest = self.digester.reduce(&content).await?;
        let result = self
            .store
            .insert_result(record.id, article, &content, &digest.text)
            .await?;

        tracing::info!(
            query_id = record.id,
            result_id = result.id,
            title = %article.title,
            chunks = digest.chunk_count,
            retried = digest.retried,
            verified = result.verified,
            "digest stored"
        );

        Ok(Outcome::Success {
            query_id: record.id,
            result_id: result.id,
            selected_topic: topic.to_string(),
            title: result.title,
            url: result.wikipedia_url,
            summary: result.summary,
            verified: result.verified,
            content_length: content.chars().count(),
        })
    }
}
