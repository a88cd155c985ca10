//! Health and feedback listing.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use am_core::types::FeedbackStatus;
use am_store::FeedbackQuery;

use crate::http_api::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/health", get(health))
        .route("/feedback", get(list_feedback))
}

pub(crate) async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime": state.start_time.elapsed().as_secs(),
        "storeMode": format!("{:?}", state.store.mode()).to_lowercase(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackQueryParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub status: Option<FeedbackStatus>,
    #[serde(default)]
    pub language: Option<String>,
}

pub(crate) async fn list_feedback(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<FeedbackQueryParams>,
) -> impl IntoResponse {
    let page = state.store.list_feedback(&FeedbackQuery {
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
        status: params.status,
        language: params.language,
    });
    Json(json!({ "list": page.list, "total": page.total }))
}
