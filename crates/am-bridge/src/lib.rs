//! Event streaming and HTTP surface for auto-mend.
//!
//! [`protocol`] defines the typed per-task events, [`events`] the bounded
//! SPSC stream that carries them to a subscriber, and [`http_api`] +
//! [`routes`] the axum application the daemon serves.

pub mod api_error;
pub mod events;
pub mod http_api;
pub mod protocol;
pub mod routes;

pub use api_error::ApiError;
pub use events::{task_stream, TaskEventReceiver, TaskEventSender};
pub use http_api::{ApiState, FeedbackProcessor};
pub use protocol::AgentEvent;
