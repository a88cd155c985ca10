//! API routes grouped by domain.
//!
//! Each module exposes a `router()` returning a `Router<Arc<ApiState>>`;
//! `http_api::build_router` merges them and applies shared layers.

pub mod agent;
pub mod circuit;
pub mod misc;
