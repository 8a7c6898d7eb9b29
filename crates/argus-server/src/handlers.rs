//! REST handlers: event ingestion, metrics queries, health reporting.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use argus_core::{BroadcastMessage, ToolCallEvent};
use argus_store::{Database, StoreError, ToolCallRepo};

use crate::server::AppState;

/// Shared state available to all REST handlers.
pub struct HandlerState {
    pub repo: ToolCallRepo,
}

impl HandlerState {
    pub fn new(db: Database) -> Self {
        Self {
            repo: ToolCallRepo::new(db),
        }
    }
}

/// Handler-level error, rendered as a JSON error body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying store error; surface only the public message.
    fn internal(public: &str, err: StoreError) -> Self {
        tracing::error!(error = %err, "{public}");
        Self::Internal(public.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Trailing-window selector shared by the metrics endpoints. Defaults to 24h.
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    hours: Option<u32>,
}

impl WindowQuery {
    fn hours(&self) -> u32 {
        self.hours.filter(|h| *h > 0).unwrap_or(24)
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    format: Option<String>,
}

/// Ingest a tool call event from an agent, then republish it to the hub.
pub async fn ingest_event(
    State(state): State<AppState>,
    payload: Result<Json<ToolCallEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload.map_err(|e| {
        tracing::debug!(error = %e, "rejected event payload");
        ApiError::BadRequest("invalid request body".into())
    })?;

    if event.request_id.is_empty() || event.tool_name.is_empty() {
        return Err(ApiError::BadRequest("missing required fields".into()));
    }
    if Uuid::parse_str(&event.request_id).is_err() {
        return Err(ApiError::BadRequest("request_id must be a valid UUID".into()));
    }

    state
        .handler_state
        .repo
        .insert(&event)
        .map_err(|e| ApiError::internal("failed to ingest event", e))?;

    // Best-effort republish; delivery is per-connection and an empty hub is
    // not an error, so the send result is deliberately ignored.
    let _ = state.event_tx.send(BroadcastMessage::tool_call(&event));

    Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))))
}

pub async fn metrics_overview(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let overview = state
        .handler_state
        .repo
        .overview(window.hours())
        .map_err(|e| ApiError::internal("failed to fetch metrics", e))?;
    Ok(Json(overview))
}

pub async fn metrics_tool_calls(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let points = state
        .handler_state
        .repo
        .tool_calls_by_hour(window.hours())
        .map_err(|e| ApiError::internal("failed to fetch tool calls metrics", e))?;
    Ok(Json(points))
}

pub async fn metrics_latency(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let points = state
        .handler_state
        .repo
        .latency_by_tool(window.hours())
        .map_err(|e| ApiError::internal("failed to fetch latency metrics", e))?;
    Ok(Json(points))
}

pub async fn metrics_token_usage(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let points = state
        .handler_state
        .repo
        .token_usage_by_hour(window.hours())
        .map_err(|e| ApiError::internal("failed to fetch token usage metrics", e))?;
    Ok(Json(points))
}

pub async fn metrics_failure_rate(
    State(state): State<AppState>,
    Query(window): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let points = state
        .handler_state
        .repo
        .failure_rate_by_hour(window.hours())
        .map_err(|e| ApiError::internal("failed to fetch failure rate metrics", e))?;
    Ok(Json(points))
}

pub async fn recent_tool_calls(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(10);
    let calls = state
        .handler_state
        .repo
        .recent(limit)
        .map_err(|e| ApiError::internal("failed to fetch recent tool calls", e))?;
    Ok(Json(calls))
}

pub async fn tool_call_chain(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = Uuid::parse_str(&request_id)
        .map_err(|_| ApiError::BadRequest("invalid request ID".into()))?;
    let calls = state
        .handler_state
        .repo
        .chain(&request_id)
        .map_err(|e| ApiError::internal("failed to fetch tool call chain", e))?;
    Ok(Json(calls))
}

/// Liveness probe: the process is up. Dependencies are not checked.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness probe: checks the database and reports hub connectivity.
/// Plain text for load balancers; JSON detail for monitoring systems that
/// ask for it (`Accept: application/json` or `?format=json`).
pub async fn readiness(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FormatQuery>,
) -> Response {
    let db_healthy = match state.handler_state.repo.ping() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed: database ping error");
            false
        }
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let wants_json = query.format.as_deref() == Some("json")
        || headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));

    if wants_json {
        let body = json!({
            "status": if db_healthy { "ready" } else { "not ready" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "services": {
                "database": {
                    "status": if db_healthy { "connected" } else { "disconnected" },
                },
                "websocket": {
                    "status": "active",
                    "connections": state.client_registry.count(),
                },
            },
        });
        (status_code, Json(body)).into_response()
    } else {
        let body = if db_healthy { "OK" } else { "NOT READY" };
        (status_code, body).into_response()
    }
}

/// Hub diagnostics for the live-viewer stream.
pub async fn ws_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "active",
        "connections": state.client_registry.count(),
        "endpoint": "/ws",
        "protocol": "RFC 6455 (WebSocket)",
    }))
}
