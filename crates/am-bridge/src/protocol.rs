//! Typed progress events streamed to the submitting client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use am_core::types::{Analysis, ChangePlan, FeedbackResult, PullRequest, TestReport};

/// One event on a task's progress stream.
///
/// Ordering contract: `connected` is always first, `done` always last, and
/// exactly one `complete` or `error` immediately precedes `done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    Connected {
        feedback_id: String,
        task_id: Uuid,
    },
    Stage {
        stage: String,
        status: String,
    },
    Intent(Analysis),
    CodeChunk {
        content: String,
    },
    Suggestion(ChangePlan),
    TestProgress {
        case: String,
        index: usize,
        total: usize,
    },
    TestResult(TestReport),
    Pr(PullRequest),
    Complete(FeedbackResult),
    Error {
        kind: String,
        message: String,
    },
    Done,
}

impl AgentEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Connected { .. } => "connected",
            AgentEvent::Stage { .. } => "stage",
            AgentEvent::Intent(_) => "intent",
            AgentEvent::CodeChunk { .. } => "code_chunk",
            AgentEvent::Suggestion(_) => "suggestion",
            AgentEvent::TestProgress { .. } => "test_progress",
            AgentEvent::TestResult(_) => "test_result",
            AgentEvent::Pr(_) => "pr",
            AgentEvent::Complete(_) => "complete",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done => "done",
        }
    }

    /// Whether the event may be shed under backpressure. Chunked output is
    /// expendable; lifecycle and result events are not.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            AgentEvent::CodeChunk { .. } | AgentEvent::TestProgress { .. }
        )
    }

    /// Whether this is a terminal-result event (`complete` or `error`).
    pub fn is_terminal_result(&self) -> bool {
        matches!(self, AgentEvent::Complete(_) | AgentEvent::Error { .. })
    }
}
