//! The five stage services.
//!
//! Every service has the same shape: `run(&mut StageContext) -> Result<StageData>`.
//! Services never call each other; the orchestrator sequences them and owns
//! the retry/handoff/abort policy. A service reads its inputs from the
//! context, writes its typed output back into it, and emits its own domain
//! events on the task stream.

pub mod analyzer;
pub mod modifier;
pub mod planner;
pub mod publisher;
pub mod tester;

use async_trait::async_trait;
use uuid::Uuid;

use am_bridge::TaskEventSender;
use am_core::types::{
    Analysis, ChangePlan, DenyReason, Feedback, Modification, Publication, StageData, StageName,
    TestReport,
};
use am_intelligence::ModelError;
use am_store::Store;

pub use analyzer::Analyzer;
pub use modifier::Modifier;
pub use planner::Planner;
pub use publisher::Publisher;
pub use tester::Tester;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("breaker blocked: {reason}")]
    BreakerBlocked { reason: DenyReason },
    #[error("model call failed: {0}")]
    ModelTransient(String),
    #[error("model output unusable: {0}")]
    BadModelOutput(String),
    #[error("workspace error: {0}")]
    Workspace(String),
    #[error("quality gate failed: {0}")]
    QualityGate(String),
    #[error("stage input missing: {0}")]
    MissingInput(&'static str),
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    /// Wire-visible error kind, per the error table of the design.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::BreakerBlocked { .. } => "breaker-blocked",
            StageError::ModelTransient(_) | StageError::BadModelOutput(_) => "model-transient",
            StageError::Workspace(_) => "workspace-error",
            StageError::QualityGate(_) => "quality-gate-failed",
            StageError::MissingInput(_) => "internal",
            StageError::Cancelled => "cancelled",
        }
    }
}

impl From<ModelError> for StageError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::BreakerBlocked { reason } => StageError::BreakerBlocked { reason },
            ModelError::Transient(msg) => StageError::ModelTransient(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;

// ---------------------------------------------------------------------------
// StageContext
// ---------------------------------------------------------------------------

/// Mutable pipeline state threaded through the stages of one task.
pub struct StageContext {
    pub task_id: Uuid,
    pub feedback: Feedback,
    /// 0 on the first pass, incremented by the retry back-edge.
    pub attempt: u32,
    pub events: TaskEventSender,
    pub store: Store,
    pub analysis: Option<Analysis>,
    pub plan: Option<ChangePlan>,
    pub modification: Option<Modification>,
    pub report: Option<TestReport>,
    /// Set by the tester when the quality gate fails.
    pub can_retry: Option<bool>,
    pub changelog: Option<String>,
    pub publication: Option<Publication>,
}

impl StageContext {
    pub fn new(task_id: Uuid, feedback: Feedback, events: TaskEventSender, store: Store) -> Self {
        Self {
            task_id,
            feedback,
            attempt: 0,
            events,
            store,
            analysis: None,
            plan: None,
            modification: None,
            report: None,
            can_retry: None,
            changelog: None,
            publication: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StageService
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StageService: Send + Sync {
    fn name(&self) -> StageName;

    /// Run the stage against the context. The returned [`StageData`] is what
    /// the orchestrator writes into the stage row.
    async fn run(&self, ctx: &mut StageContext) -> Result<StageData>;
}

// ---------------------------------------------------------------------------
// Model-output parsing
// ---------------------------------------------------------------------------

/// Extract the first JSON value from model output, tolerating code fences
/// and surrounding prose.
pub(crate) fn extract_json(content: &str) -> Result<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Try fenced blocks first, then the widest brace/bracket span.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str(after[..end].trim()) {
                return Ok(value);
            }
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }
    Err(StageError::BadModelOutput(format!(
        "no JSON found in model output ({} chars)",
        content.len()
    )))
}
