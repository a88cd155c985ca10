//! Shared API state and application router.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{middleware as axum_middleware, Router};
use tower_http::cors::CorsLayer;

use am_core::types::Feedback;
use am_harness::TokenBreaker;
use am_store::Store;
use am_telemetry::tracing_setup::request_id_middleware;

use crate::events::{TaskEventSender, DEFAULT_STREAM_CAPACITY};
use crate::routes;

/// The pipeline seam. The orchestrator implements this; ingress only knows
/// it can hand a feedback and an event sender to *something* that drives the
/// pipeline to a terminal state.
#[async_trait]
pub trait FeedbackProcessor: Send + Sync {
    /// Run the full pipeline for `feedback`, emitting progress on `events`.
    /// Must reach a terminal state on every path; the ingress never polls.
    async fn process(&self, feedback: Feedback, events: TaskEventSender);
}

/// Shared state for all HTTP handlers.
pub struct ApiState {
    pub store: Store,
    pub breaker: TokenBreaker,
    pub processor: Arc<dyn FeedbackProcessor>,
    pub start_time: Instant,
    pub stream_capacity: usize,
}

impl ApiState {
    pub fn new(store: Store, breaker: TokenBreaker, processor: Arc<dyn FeedbackProcessor>) -> Self {
        Self {
            store,
            breaker,
            processor,
            start_time: Instant::now(),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

/// Assemble the application router.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(routes::agent::router())
        .merge(routes::circuit::router())
        .merge(routes::misc::router())
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
