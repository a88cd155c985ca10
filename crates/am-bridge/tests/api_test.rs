//! HTTP surface tests with a stub pipeline behind the processor seam.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use am_bridge::http_api::{build_router, ApiState, FeedbackProcessor};
use am_bridge::{AgentEvent, TaskEventSender};
use am_core::types::Feedback;
use am_harness::{BreakerConfig, TokenBreaker};
use am_store::{FeedbackQuery, Store};

/// Stub pipeline: emits the minimal legal stream and touches nothing else.
struct StubProcessor;

#[async_trait]
impl FeedbackProcessor for StubProcessor {
    async fn process(&self, feedback: Feedback, events: TaskEventSender) {
        events.emit(AgentEvent::Connected {
            feedback_id: feedback.id.clone(),
            task_id: uuid::Uuid::new_v4(),
        });
        events.emit(AgentEvent::Complete(am_core::types::FeedbackResult {
            needs_human: false,
            message: "stubbed".into(),
            pr_url: None,
        }));
        events.emit(AgentEvent::Done);
    }
}

fn test_state() -> (Arc<ApiState>, Store, TokenBreaker) {
    let store = Store::in_memory();
    let breaker = TokenBreaker::new(
        BreakerConfig {
            max_daily_tokens: 1000,
            ..BreakerConfig::default()
        },
        Arc::new(store.clone()),
    );
    let state = Arc::new(ApiState::new(
        store.clone(),
        breaker.clone(),
        Arc::new(StubProcessor),
    ));
    (state, store, breaker)
}

async fn json_request(
    state: Arc<ApiState>,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let router = build_router(state);
    let request = match body {
        Some(value) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

// ---------------------------------------------------------------------------
// Ingress validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_content_is_400_and_stores_nothing() {
    let (state, store, _) = test_state();
    let (status, body) = json_request(
        state,
        "POST",
        "/agent/process",
        Some(serde_json::json!({ "content": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));
    assert_eq!(store.list_feedback(&FeedbackQuery::default()).total, 0);
}

#[tokio::test]
async fn valid_submission_returns_summary() {
    let (state, store, _) = test_state();
    let (status, body) = json_request(
        state,
        "POST",
        "/agent/process",
        Some(serde_json::json!({ "content": "德语翻译不准确", "userId": "u1", "language": "zh" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let feedback_id = body["feedbackId"].as_str().unwrap();
    assert!(!feedback_id.is_empty());
    assert!(body["breakerSnapshot"]["circuit"].is_string());

    let fb = store.get_feedback(feedback_id).unwrap();
    assert_eq!(fb.user_id, "u1");
    assert_eq!(fb.language, "zh");
}

#[tokio::test]
async fn content_is_clamped_to_280_chars() {
    let (state, store, _) = test_state();
    let long = "x".repeat(400);
    let (status, body) = json_request(
        state,
        "POST",
        "/agent/process",
        Some(serde_json::json!({ "content": long })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let fb = store
        .get_feedback(body["feedbackId"].as_str().unwrap())
        .unwrap();
    assert_eq!(fb.content.chars().count(), 280);
}

// ---------------------------------------------------------------------------
// Listings and health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn feedback_listing_filters_and_pages() {
    let (state, store, _) = test_state();
    for i in 0..3 {
        store.create_feedback(Feedback::new(format!("item {i}"), "u", "de"));
    }
    store.create_feedback(Feedback::new("english item", "u", "en"));

    let (status, body) =
        json_request(state, "GET", "/feedback?language=de&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["list"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn health_reports_uptime_and_store_mode() {
    let (state, _, _) = test_state();
    let (status, body) = json_request(state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storeMode"], "memory");
    assert!(body["uptime"].is_number());
}

// ---------------------------------------------------------------------------
// Circuit endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn circuit_status_starts_closed() {
    let (state, _, _) = test_state();
    let (status, body) = json_request(state, "GET", "/circuit/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["circuit"], "closed");
    assert_eq!(body["daily_tokens_used"], 0);
}

#[tokio::test]
async fn diagnostic_check_allows_and_denies() {
    let (state, _, _) = test_state();

    let (status, body) = json_request(
        state.clone(),
        "POST",
        "/circuit/check",
        Some(serde_json::json!({ "service": "llm", "action": "diagnostic" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    // Over the daily budget (1000) → denied, but still a 200: the circuit
    // itself is not open.
    let (status, body) = json_request(
        state,
        "POST",
        "/circuit/check",
        Some(serde_json::json!({
            "service": "llm",
            "action": "diagnostic",
            "estimatedTokens": 5000
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "daily_limit");
}

#[tokio::test]
async fn open_circuit_diagnostic_check_is_503() {
    let (state, _, breaker) = test_state();
    // Trip the circuit with repeated over-budget checks.
    for _ in 0..5 {
        breaker.check("llm", "diag", 5000, None).await;
    }

    let (status, body) = json_request(
        state,
        "POST",
        "/circuit/check",
        Some(serde_json::json!({ "service": "llm", "action": "diag" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["reason"], "circuit_open");
}

#[tokio::test]
async fn breaker_events_list_and_resolve() {
    let (state, store, breaker) = test_state();
    breaker.check("llm", "analyze_intent", 5000, None).await;

    let (status, body) = json_request(
        state.clone(),
        "GET",
        "/circuit/events?unresolvedOnly=true",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    let id = body["list"][0]["id"].as_str().unwrap().to_string();

    let (status, _) = json_request(
        state.clone(),
        "POST",
        &format!("/circuit/events/{id}/resolve"),
        Some(serde_json::json!({ "note": "budget raised" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = json_request(
        state,
        "GET",
        "/circuit/events?unresolvedOnly=true",
        None,
    )
    .await;
    assert_eq!(body["total"], 0);
    // The resolution survived in the store.
    let events = store.list_breaker_events(&am_store::BreakerEventQuery::default());
    assert!(events.list[0].resolved);
}

#[tokio::test]
async fn token_usage_endpoint_returns_aggregates() {
    let (state, store, _) = test_state();
    store.append_token_usage(am_core::types::TokenUsageRecord {
        id: uuid::Uuid::new_v4(),
        task_id: uuid::Uuid::new_v4(),
        feedback_id: "fb-1".into(),
        model: "claude-sonnet-4-20250514".into(),
        prompt_tokens: 100,
        completion_tokens: 40,
        call_type: am_core::types::CallType::AnalyzeIntent,
        timestamp: chrono::Utc::now(),
        success: true,
        error: None,
    });

    let (status, body) = json_request(state, "GET", "/circuit/token-usage", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["aggregates"]["totalPromptTokens"], 100);
    assert_eq!(body["aggregates"]["successCount"], 1);
}

// ---------------------------------------------------------------------------
// Task logs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_logs_filter_by_feedback() {
    let (state, store, _) = test_state();
    let task = am_core::types::TaskRecord::new("fb-wanted");
    store.create_task(task);
    store.create_task(am_core::types::TaskRecord::new("fb-other"));

    let (status, body) = json_request(
        state,
        "GET",
        "/agent/task-logs?feedbackId=fb-wanted",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["list"][0]["feedback_id"], "fb-wanted");
}
