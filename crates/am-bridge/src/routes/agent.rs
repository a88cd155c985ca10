//! Feedback ingress: submit, stream, task logs.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use am_core::types::{Feedback, StageData, TaskStatus};
use am_store::TaskQuery;

use crate::api_error::ApiError;
use crate::events::task_stream;
use crate::http_api::ApiState;
use crate::protocol::AgentEvent;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/agent/process", post(process_feedback))
        .route("/agent/process/stream", post(process_feedback_stream))
        .route("/agent/task-logs", get(task_logs))
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub content: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Validate a submission and create the feedback row. Whitespace-only
/// content is rejected before anything is stored.
fn accept_feedback(state: &ApiState, req: &ProcessRequest) -> Result<Feedback, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".into()));
    }
    let feedback = Feedback::new(
        req.content.clone(),
        req.user_id.clone().unwrap_or_else(|| "anonymous".into()),
        req.language.clone().unwrap_or_else(|| "en".into()),
    );
    state.store.create_feedback(feedback.clone());
    info!(feedback_id = %feedback.id, "feedback accepted");
    Ok(feedback)
}

// ---------------------------------------------------------------------------
// POST /agent/process -- run to completion, reply once
// ---------------------------------------------------------------------------

pub(crate) async fn process_feedback(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let feedback = accept_feedback(&state, &req)?;
    let feedback_id = feedback.id.clone();

    // No subscriber: the receiver is dropped immediately, so emissions are
    // silent no-ops while the pipeline runs inline.
    let (events, receiver) = task_stream(state.stream_capacity);
    drop(receiver);
    state.processor.process(feedback, events).await;

    let status = state
        .store
        .get_feedback(&feedback_id)
        .map(|f| f.status)
        .ok_or_else(|| ApiError::Internal("feedback row vanished".into()))?;

    let tasks = state.store.list_tasks(&TaskQuery {
        feedback_id: Some(feedback_id.clone()),
        limit: Some(1),
        ..Default::default()
    });
    let (analysis, plan) = tasks
        .list
        .first()
        .map(|task| {
            let mut analysis = None;
            let mut plan = None;
            for stage in &task.stages {
                match &stage.data {
                    Some(StageData::Analysis(a)) => analysis = Some(a.clone()),
                    Some(StageData::Plan(p)) => plan = Some(p.clone()),
                    _ => {}
                }
            }
            (analysis, plan)
        })
        .unwrap_or((None, None));

    Ok(Json(json!({
        "feedbackId": feedback_id,
        "status": status,
        "analysis": analysis,
        "plan": plan,
        "breakerSnapshot": state.breaker.status().await,
    })))
}

// ---------------------------------------------------------------------------
// POST /agent/process/stream -- server-sent events
// ---------------------------------------------------------------------------

pub(crate) async fn process_feedback_stream(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ProcessRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let feedback = accept_feedback(&state, &req)?;

    let (events, mut receiver) = task_stream(state.stream_capacity);
    let processor = state.processor.clone();
    // The pipeline owns its own lifetime: client disconnects drop the
    // receiver, never the task.
    tokio::spawn(async move {
        processor.process(feedback, events).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = receiver.recv().await {
            let is_done = matches!(event, AgentEvent::Done);
            if let Ok(sse_event) = Event::default().event(event.name()).json_data(&event) {
                yield Ok(sse_event);
            }
            if is_done {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

// ---------------------------------------------------------------------------
// GET /agent/task-logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub task_id: Option<Uuid>,
    #[serde(default)]
    pub feedback_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

pub(crate) async fn task_logs(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TaskLogsQuery>,
) -> impl IntoResponse {
    let page = state.store.list_tasks(&TaskQuery {
        limit: query.limit,
        offset: query.offset.unwrap_or(0),
        task_id: query.task_id,
        feedback_id: query.feedback_id,
        status: query.status,
    });
    Json(json!({ "list": page.list, "total": page.total }))
}
