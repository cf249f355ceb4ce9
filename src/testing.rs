//! Test doubles for the model and encyclopedia seams.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{LlmError, LookupError};
use crate::llm::{ChatModel, ChatRequest};
use crate::models::{Article, ArticleOrigin};
use crate::wiki::{Encyclopedia, LookupOutcome};

type Responder = dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync;

/// A model whose replies are computed by a closure; records every request.
pub struct FnModel {
    respond: Box<Responder>,
    pub calls: Mutex<Vec<ChatRequest>>,
}

impl FnModel {
    pub fn new(
        respond: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always replies with the same text.
    pub fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Ok(reply.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn schema_calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.schema_name() == name)
            .count()
    }
}

#[async_trait]
impl ChatModel for FnModel {
    fn model_name(&self) -> &str {
        "fn-model"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}

/// An in-memory encyclopedia keyed by exact title.
#[derive(Default)]
pub struct FakeWiki {
    pages: HashMap<String, (String, String)>,
    disambiguations: HashMap<String, Vec<String>>,
    searches: HashMap<String, Vec<String>>,
    pub lookups: Mutex<Vec<String>>,
}

impl FakeWiki {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, title: &str, summary: &str, content: &str) -> Self {
        self.pages
            .insert(title.to_string(), (summary.to_string(), content.to_string()));
        self
    }

    pub fn disambiguation(mut self, title: &str, candidates: &[&str]) -> Self {
        self.disambiguations.insert(
            title.to_string(),
            candidates.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn search_hits(mut self, query: &str, titles: &[&str]) -> Self {
        self.searches.insert(
            query.to_string(),
            titles.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn url_for(title: &str) -> String {
        format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_"))
    }
}

#[async_trait]
impl Encyclopedia for FakeWiki {
    async fn lookup(&self, title: &str, _exact: bool) -> Result<LookupOutcome, LookupError> {
        self.lookups.lock().unwrap().push(title.to_string());
        if let Some(c) = self.disambiguations.get(title) {
            return Ok(LookupOutcome::Ambiguous(c.clone()));
        }
        Ok(match self.pages.get(title) {
            Some((summary, _)) => LookupOutcome::Found(Article {
                title: title.to_string(),
                url: Self::url_for(title),
                summary: summary.clone(),
                origin: ArticleOrigin::Confirmed,
            }),
            None => LookupOutcome::NotFound,
        })
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, LookupError> {
        let mut hits = self.searches.get(query).cloned().unwrap_or_default();
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn content(&self, title: &str) -> Result<Option<String>, LookupError> {
        Ok(self.pages.get(title).map(|(_, content)| content.clone()))
    }
}
