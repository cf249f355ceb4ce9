//! Persistence for queries and search results.
//!
//! Two flat tables: `queries` rows are created once per inbound request and
//! may have their topic rewritten; `search_results` rows are append-only.
//! Timestamps are stored as Unix seconds and rendered as ISO-8601.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::{PipelineError, Result};
use crate::migrate;
use crate::models::{Article, Query, SearchResult, TopicExtraction};

const QUERY_COLUMNS: &str =
    "id, original_query, extracted_topic, confidence, is_ambiguous, created_at, updated_at";
const RESULT_COLUMNS: &str =
    "id, query_id, wikipedia_url, title, content, summary, verified, created_at";

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to the configured database and applies migrations.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::store("ping", e))?;
        Ok(())
    }

    pub async fn insert_query(&self, original: &str, extraction: &TopicExtraction) -> Result<Query> {
        let now = chrono::Utc::now().timestamp();
        let id = sqlx::query(
            "INSERT INTO queries (original_query, extracted_topic, confidence, is_ambiguous, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(original)
        .bind(&extraction.topic)
        .bind(extraction.confidence)
        .bind(extraction.is_ambiguous)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::store("insert_query", e))?
        .last_insert_rowid();

        self.require_query(id).await
    }

    /// Rewrites the topic of an existing query after disambiguation.
    pub async fn update_topic(
        &self,
        id: i64,
        topic: &str,
        confidence: f64,
        is_ambiguous: bool,
    ) -> Result<Query> {
        let now = chrono::Utc::now().timestamp();
        let done = sqlx::query(
            "UPDATE queries SET extracted_topic = ?, confidence = ?, is_ambiguous = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(topic)
        .bind(confidence)
        .bind(is_ambiguous)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::store("update_topic", e))?;

        if done.rows_affected() == 0 {
            return Err(PipelineError::QueryNotFound(id));
        }
        self.require_query(id).await
    }

    /// Rewrites both the original text and the extraction of a refined query.
    pub async fn update_refinement(
        &self,
        id: i64,
        original: &str,
        extraction: &TopicExtraction,
    ) -> Result<Query> {
        let now = chrono::Utc::now().timestamp();
        let done = sqlx::query(
            "UPDATE queries SET original_query = ?, extracted_topic = ?, confidence = ?, \
             is_ambiguous = ?, updated_at = ? WHERE id = ?",
        )
        .bind(original)
        .bind(&extraction.topic)
        .bind(extraction.confidence)
        .bind(extraction.is_ambiguous)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::store("update_refinement", e))?;

        if done.rows_affected() == 0 {
            return Err(PipelineError::QueryNotFound(id));
        }
        self.require_query(id).await
    }

    pub async fn get_query(&self, id: i64) -> Result<Option<Query>> {
        let row = sqlx::query(&format!("SELECT {} FROM queries WHERE id = ?", QUERY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::store("get_query", e))?;
        Ok(row.as_ref().map(query_from_row))
    }

    /// Like [`get_query`](Self::get_query) but a missing row is an error.
    pub async fn require_query(&self, id: i64) -> Result<Query> {
        self.get_query(id)
            .await?
            .ok_or(PipelineError::QueryNotFound(id))
    }

    /// All queries, newest first.
    pub async fn list_queries(&self) -> Result<Vec<Query>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queries ORDER BY created_at DESC, id DESC",
            QUERY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::store("list_queries", e))?;
        Ok(rows.iter().map(query_from_row).collect())
    }

    pub async fn insert_result(
        &self,
        query_id: i64,
        article: &Article,
        content: &str,
        summary: &str,
    ) -> Result<SearchResult> {
        let now = chrono::Utc::now().timestamp();
        let id = sqlx::query(
            "INSERT INTO search_results (query_id, wikipedia_url, title, content, summary, verified, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(query_id)
        .bind(&article.url)
        .bind(&article.title)
        .bind(content)
        .bind(summary)
        .bind(article.is_verified())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::store("insert_result", e))?
        .last_insert_rowid();

        let row = sqlx::query(&format!(
            "SELECT {} FROM search_results WHERE id = ?",
            RESULT_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::store("insert_result", e))?;
        Ok(result_from_row(&row))
    }

    /// All results, newest first.
    pub async fn list_results(&self) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM search_results ORDER BY created_at DESC, id DESC",
            RESULT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::store("list_results", e))?;
        Ok(rows.iter().map(result_from_row).collect())
    }

    pub async fn results_for_query(&self, query_id: i64) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM search_results WHERE query_id = ? ORDER BY id ASC",
            RESULT_COLUMNS
        ))
        .bind(query_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::store("results_for_query", e))?;
        Ok(rows.iter().map(result_from_row).collect())
    }
}

fn query_from_row(row: &SqliteRow) -> Query {
    let created_at: i64 = row.get("created_at");
    let updated_at: Option<i64> = row.get("updated_at");
    Query {
        id: row.get("id"),
        original_query: row.get("original_query"),
        extracted_topic: row.get("extracted_topic"),
        confidence: row.get("confidence"),
        is_ambiguous: row.get("is_ambiguous"),
        created_at: format_ts_iso(created_at),
        updated_at: updated_at.map(format_ts_iso),
    }
}

fn result_from_row(row: &SqliteRow) -> SearchResult {
    let created_at: i64 = row.get("created_at");
    SearchResult {
        id: row.get("id"),
        query_id: row.get("query_id"),
        wikipedia_url: row.get("wikipedia_url"),
        title: row.get("title"),
        content: row.get("content"),
        summary: row.get("summary"),
        verified: row.get("verified"),
        created_at: format_ts_iso(created_at),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
