//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/v1/process` | Start a new query |
//! | `POST` | `/api/v1/disambiguate` | Answer a disambiguation question |
//! | `POST` | `/api/v1/confirm` | Confirm an article URL or refine the query |
//! | `GET`  | `/api/v1/queries` | All recorded queries |
//! | `GET`  | `/api/v1/results` | All stored digests |
//! | `GET`  | `/api/v1/query/{id}` | One query with its results |
//! | `GET`  | `/api/v1/health` | Database check and version |
//!
//! Pipeline responses are the serialized [`Outcome`] plus an `agent_info`
//! object naming the component that produced it. Every response carries an
//! `X-Request-ID` header; pipeline responses and errors also carry
//! `X-Agent-Info` and `X-Operation`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "query not found: 7",
//!              "agent": "Store", "operation": "get_query", "request_id": "1f0c9a2b" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `context_length_exceeded` (422), `upstream_error` (502), `internal` (500).

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::Config;
use crate::error::{Component, PipelineError};
use crate::models::{DisambiguationOption, Query, SearchResult};
use crate::pipeline::{Outcome, Pipeline};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Short per-request identifier, also logged on the request span.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    fn new() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        RequestId(id[..8].to_string())
    }
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    println!("wiki-digest listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Serves on an already-bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let state = AppState { pipeline };

    Router::new()
        .route("/api/v1/process", post(handle_process))
        .route("/api/v1/disambiguate", post(handle_disambiguate))
        .route("/api/v1/confirm", post(handle_confirm))
        .route("/api/v1/queries", get(handle_queries))
        .route("/api/v1/results", get(handle_results))
        .route("/api/v1/query/{id}", get(handle_query))
        .route("/api/v1/health", get(handle_health))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId::new();
    request.extensions_mut().insert(id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %id.0,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id.0) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

// ============ Responses ============

#[derive(Debug, Serialize)]
struct AgentInfo {
    name: &'static str,
    status: &'static str,
    current_operation: &'static str,
    request_id: String,
}

/// An [`Outcome`] with its `agent_info`.
#[derive(Serialize)]
struct OutcomeResponse {
    #[serde(flatten)]
    outcome: Outcome,
    agent_info: AgentInfo,
}

impl OutcomeResponse {
    fn new(outcome: Outcome, request_id: &RequestId) -> Self {
        let (component, status, operation) = match &outcome {
            Outcome::NeedsDisambiguation { .. } => {
                (Component::Disambiguator, "processing", "generating_options")
            }
            Outcome::NeedsClarification { .. } => {
                (Component::Disambiguator, "processing", "conversation")
            }
            Outcome::NeedsConfirmation { .. } => {
                (Component::KnowledgeRetriever, "processing", "search")
            }
            Outcome::Success { .. } => (Component::DigestBuilder, "completed", "summarization"),
        };
        Self {
            outcome,
            agent_info: AgentInfo {
                name: component.as_str(),
                status,
                current_operation: operation,
                request_id: request_id.0.clone(),
            },
        }
    }
}

impl IntoResponse for OutcomeResponse {
    fn into_response(self) -> Response {
        let headers = agent_headers(self.agent_info.name, self.agent_info.current_operation);
        (headers, Json(self)).into_response()
    }
}

fn agent_headers(agent: &str, operation: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(agent) {
        headers.insert("x-agent-info", v);
    }
    if let Ok(v) = HeaderValue::from_str(operation) {
        headers.insert("x-operation", v);
    }
    headers
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    agent: &'static str,
    operation: &'static str,
    request_id: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    agent: &'static str,
    operation: &'static str,
    request_id: String,
}

impl AppError {
    fn from_pipeline(err: PipelineError, request_id: &RequestId) -> Self {
        let (status, code) = classify(&err);
        let agent = err.component().as_str();
        let operation = err.operation();

        if status.is_server_error() {
            tracing::error!(agent, operation, error = %err, "request failed");
        } else {
            tracing::warn!(agent, operation, error = %err, "request rejected");
        }

        AppError {
            status,
            code,
            message: err.to_string(),
            agent,
            operation,
            request_id: request_id.0.clone(),
        }
    }
}

impl AppError {
    /// A request body that is not valid JSON for the endpoint.
    fn invalid_body(rejection: JsonRejection, request_id: &RequestId) -> Self {
        let message = format!("invalid request body: {}", rejection.body_text());
        tracing::warn!(error = %message, "request rejected");
        AppError {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message,
            agent: Component::Pipeline.as_str(),
            operation: "validate",
            request_id: request_id.0.clone(),
        }
    }
}

fn classify(err: &PipelineError) -> (StatusCode, &'static str) {
    match err {
        PipelineError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        PipelineError::QueryNotFound(_) | PipelineError::ContentNotFound { .. } => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        PipelineError::Store { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        _ if err.is_timeout() => (StatusCode::REQUEST_TIMEOUT, "timeout"),
        _ if err.llm_error().is_some_and(|e| e.is_context_length()) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "context_length_exceeded")
        }
        PipelineError::Model { .. } | PipelineError::Unresolved { .. } => {
            (StatusCode::BAD_GATEWAY, "upstream_error")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let headers = agent_headers(self.agent, self.operation);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                agent: self.agent,
                operation: self.operation,
                request_id: self.request_id,
            },
        };
        (self.status, headers, Json(body)).into_response()
    }
}

// ============ Handlers ============

#[derive(Deserialize)]
struct ProcessRequest {
    query: String,
}

#[derive(Deserialize)]
struct DisambiguateRequest {
    query_id: i64,
    selected_option: String,
    #[serde(default)]
    options: Option<Vec<DisambiguationOption>>,
}

#[derive(Deserialize)]
struct ConfirmRequest {
    query_id: i64,
    user_selected_option: String,
}

async fn handle_process(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<OutcomeResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::invalid_body(e, &request_id))?;
    let outcome = state
        .pipeline
        .process(&req.query)
        .await
        .map_err(|e| AppError::from_pipeline(e, &request_id))?;
    Ok(OutcomeResponse::new(outcome, &request_id))
}

async fn handle_disambiguate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<DisambiguateRequest>, JsonRejection>,
) -> Result<OutcomeResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::invalid_body(e, &request_id))?;
    let outcome = state
        .pipeline
        .disambiguate(req.query_id, &req.selected_option, req.options)
        .await
        .map_err(|e| AppError::from_pipeline(e, &request_id))?;
    Ok(OutcomeResponse::new(outcome, &request_id))
}

async fn handle_confirm(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<OutcomeResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::invalid_body(e, &request_id))?;
    let outcome = state
        .pipeline
        .confirm(req.query_id, &req.user_selected_option)
        .await
        .map_err(|e| AppError::from_pipeline(e, &request_id))?;
    Ok(OutcomeResponse::new(outcome, &request_id))
}

async fn handle_queries(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<Vec<Query>>, AppError> {
    let queries = state
        .pipeline
        .store()
        .list_queries()
        .await
        .map_err(|e| AppError::from_pipeline(e, &request_id))?;
    Ok(Json(queries))
}

async fn handle_results(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    let results = state
        .pipeline
        .store()
        .list_results()
        .await
        .map_err(|e| AppError::from_pipeline(e, &request_id))?;
    Ok(Json(results))
}

#[derive(Serialize)]
struct QueryDetail {
    query: Query,
    results: Vec<SearchResult>,
}

async fn handle_query(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<i64>,
) -> Result<Json<QueryDetail>, AppError> {
    let store = state.pipeline.store();
    let lookup = async {
        let query = store.require_query(id).await?;
        let results = store.results_for_query(id).await?;
        Ok::<_, PipelineError>(QueryDetail { query, results })
    };
    let detail = lookup
        .await
        .map_err(|e| AppError::from_pipeline(e, &request_id))?;
    Ok(Json(detail))
}

#[derive(Serialize)]
struct HealthServices {
    database: &'static str,
    api: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    services: Option<HealthServices>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.pipeline.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                services: Some(HealthServices {
                    database: "connected",
                    api: "operational",
                }),
                version: Some(env!("CARGO_PKG_VERSION")),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    services: None,
                    version: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
