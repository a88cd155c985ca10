//! Breaker observability and diagnostics.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use am_core::types::{BreakerSnapshot, DenyReason};
use am_store::{BreakerEventQuery, TokenUsageQuery};

use crate::api_error::ApiError;
use crate::http_api::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/circuit/status", get(circuit_status))
        .route("/circuit/check", post(circuit_check))
        .route("/circuit/token-usage", get(token_usage))
        .route("/circuit/events", get(breaker_events))
        .route("/circuit/events/:id/resolve", post(resolve_event))
}

// ---------------------------------------------------------------------------
// GET /circuit/status
// ---------------------------------------------------------------------------

pub(crate) async fn circuit_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.breaker.status().await)
}

// ---------------------------------------------------------------------------
// POST /circuit/check -- diagnostic admission probe
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub snapshot: BreakerSnapshot,
}

pub(crate) async fn circuit_check(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let admission = state
        .breaker
        .check(
            &req.service,
            &req.action,
            req.estimated_tokens.unwrap_or(0),
            req.task_id,
        )
        .await;

    let status = if admission.reason == Some(DenyReason::CircuitOpen) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = CheckResponse {
        allowed: admission.allowed,
        reason: admission.reason,
        snapshot: admission.snapshot,
    };
    (status, Json(body))
}

// ---------------------------------------------------------------------------
// GET /circuit/token-usage
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQueryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub feedback_id: Option<String>,
}

pub(crate) async fn token_usage(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<UsageQueryParams>,
) -> impl IntoResponse {
    let (page, aggregates) = state.store.list_token_usage(&TokenUsageQuery {
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
        task_id: params.task_id,
        feedback_id: params.feedback_id,
        ..Default::default()
    });
    Json(json!({
        "list": page.list,
        "total": page.total,
        "aggregates": aggregates,
    }))
}

// ---------------------------------------------------------------------------
// GET /circuit/events, POST /circuit/events/:id/resolve
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQueryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub unresolved_only: bool,
}

pub(crate) async fn breaker_events(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<EventsQueryParams>,
) -> impl IntoResponse {
    let page = state.store.list_breaker_events(&BreakerEventQuery {
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
        service: params.service,
        unresolved_only: params.unresolved_only,
        since: None,
    });
    Json(json!({ "list": page.list, "total": page.total }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub note: String,
}

pub(crate) async fn resolve_event(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.resolve_breaker_event(id, req.note)?;
    Ok(Json(json!({ "resolved": true })))
}
