//! ID and branch-name generation.

use chrono::Utc;
use uuid::Uuid;

/// New opaque feedback ID (32 hex chars, no hyphens).
pub fn new_feedback_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// First 8 characters of an ID, for branch names and log lines.
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

/// Branch name for a task working on `feedback_id`.
///
/// The millisecond timestamp makes the name unique per task even when the
/// same feedback is retried.
pub fn branch_name(feedback_id: &str) -> String {
    format!(
        "feedback-{}-{}",
        short_id(feedback_id),
        Utc::now().timestamp_millis()
    )
}
