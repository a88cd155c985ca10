use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// FeedbackStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Analyzing,
    Generating,
    Modifying,
    Testing,
    Publishing,
    Completed,
    NeedsHuman,
    Failed,
}

impl FeedbackStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    ///
    /// Non-terminal statuses may always fall to `Failed` or `NeedsHuman`;
    /// the forward path follows the pipeline order. Terminal statuses accept
    /// no further transitions.
    pub fn can_transition_to(&self, target: &FeedbackStatus) -> bool {
        use FeedbackStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(target, Failed | NeedsHuman) {
            return true;
        }
        matches!(
            (self, target),
            (Pending, Analyzing)
                | (Analyzing, Generating)
                | (Generating, Modifying)
                | (Modifying, Testing)
                | (Testing, Publishing)
                // retry back-edge: re-plan after a failed test round
                | (Testing, Generating)
                | (Publishing, Completed)
                // human-handoff path ends without publishing
                | (Analyzing, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeedbackStatus::Completed | FeedbackStatus::NeedsHuman | FeedbackStatus::Failed
        )
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// Maximum length of feedback content; longer submissions are truncated.
pub const MAX_FEEDBACK_CONTENT: usize = 280;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub status: FeedbackStatus,
    pub result: Option<FeedbackResult>,
}

impl Feedback {
    /// Create a pending feedback, clamping `content` to [`MAX_FEEDBACK_CONTENT`]
    /// characters.
    pub fn new(
        content: impl Into<String>,
        user_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        let content: String = content.into();
        let content = if content.chars().count() > MAX_FEEDBACK_CONTENT {
            content.chars().take(MAX_FEEDBACK_CONTENT).collect()
        } else {
            content
        };
        Self {
            id: crate::ids::new_feedback_id(),
            user_id: user_id.into(),
            content,
            language: language.into(),
            created_at: Utc::now(),
            status: FeedbackStatus::Pending,
            result: None,
        }
    }
}

/// Terminal outcome attached to a feedback once its last task finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub needs_human: bool,
    pub message: String,
    pub pr_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// One end-to-end run of the pipeline for a feedback. A retry of the whole
/// pipeline creates a new task; the stages list is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub feedback_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub stages: Vec<StageRecord>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(feedback_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            feedback_id: feedback_id.into(),
            created_at: Utc::now(),
            completed_at: None,
            status: TaskStatus::Running,
            stages: Vec::new(),
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    AnalyzeIntent,
    GenerateSolution,
    ApplyChanges,
    RunTests,
    GenerateChangelog,
    CreatePr,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageName::AnalyzeIntent => "analyze-intent",
            StageName::GenerateSolution => "generate-solution",
            StageName::ApplyChanges => "apply-changes",
            StageName::RunTests => "run-tests",
            StageName::GenerateChangelog => "generate-changelog",
            StageName::CreatePr => "create-pr",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Stage statuses move forward only: `Started` may become any terminal
    /// status; terminal statuses are frozen.
    pub fn can_transition_to(&self, target: &StageStatus) -> bool {
        matches!(
            (self, target),
            (StageStatus::Started, StageStatus::Completed)
                | (StageStatus::Started, StageStatus::Failed)
                | (StageStatus::Started, StageStatus::Skipped)
        )
    }
}

/// One step of a task. `ended_at`, when set, is never earlier than
/// `started_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub data: Option<StageData>,
}

impl StageRecord {
    pub fn started(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Started,
            started_at: Utc::now(),
            ended_at: None,
            data: None,
        }
    }
}

/// Typed stage output blob. Each stage produces exactly one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
#[serde(rename_all = "snake_case")]
pub enum StageData {
    Analysis(Analysis),
    Plan(ChangePlan),
    Modification(Modification),
    TestReport(TestReport),
    Publication(Publication),
    /// Free-text failure context for a failed stage.
    Note(String),
}

// ---------------------------------------------------------------------------
// Stage payload records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Accuracy,
    Speed,
    Ui,
    Function,
    Language,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feasibility {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Output of the analyze-intent stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub intent: Intent,
    pub feasibility: Feasibility,
    pub priority: Priority,
    pub impact: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Replace,
    Insert,
    Delete,
}

/// Output of the generate-solution stage: a single-file change proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePlan {
    pub file: String,
    pub action: PlanAction,
    pub code_block: String,
    pub description: String,
}

/// Output of the apply-changes stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modification {
    pub branch: String,
    pub file: String,
    pub commit_hash: String,
    pub lines_added: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
}

/// Result of a single generated browser test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub status: CaseStatus,
    pub error: Option<String>,
}

/// Aggregate output of the run-tests stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: bool,
    pub tests_run: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub details: Vec<CaseResult>,
}

impl TestReport {
    pub fn from_cases(details: Vec<CaseResult>) -> Self {
        let tests_run = details.len();
        let tests_passed = details
            .iter()
            .filter(|c| c.status == CaseStatus::Passed)
            .count();
        Self {
            passed: tests_passed == tests_run && tests_run > 0,
            tests_run,
            tests_passed,
            tests_failed: tests_run - tests_passed,
            details,
        }
    }
}

/// An opaque record of a proposed change published to the hosting system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub number: u64,
    pub branch: String,
    pub title: String,
    pub body: String,
}

/// Output of the publish stages (changelog + PR record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub changelog: String,
    pub pr: PullRequest,
}

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    AnalyzeIntent,
    GenerateSolution,
    GenerateTests,
    AssessQuality,
    GenerateChangelog,
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallType::AnalyzeIntent => "analyze_intent",
            CallType::GenerateSolution => "generate_solution",
            CallType::GenerateTests => "generate_tests",
            CallType::AssessQuality => "assess_quality",
            CallType::GenerateChangelog => "generate_changelog",
        };
        write!(f, "{s}")
    }
}

/// One external-model call, success or failure. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub feedback_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub call_type: CallType,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Breaker records
// ---------------------------------------------------------------------------

/// Why an admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    CircuitOpen,
    DailyLimit,
    TaskLimit,
    ConcurrencyLimit,
    MaxRetries,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::CircuitOpen => "circuit-open",
            DenyReason::DailyLimit => "daily-limit",
            DenyReason::TaskLimit => "task-limit",
            DenyReason::ConcurrencyLimit => "concurrency-limit",
            DenyReason::MaxRetries => "max-retries",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateTag {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of breaker state, attached to every admission decision
/// and served by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub circuit: CircuitStateTag,
    pub daily_tokens_used: u64,
    pub max_daily_tokens: u64,
    pub concurrent_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub tracked_tasks: usize,
    pub recent_denials: usize,
    /// Milliseconds until the open circuit next admits a probe, when open.
    pub open_remaining_ms: Option<u64>,
}

/// One non-allowed admission decision. Append-only except for the
/// `resolved`/`resolution_note` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerEventRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub action: String,
    pub event_type: DenyReason,
    pub usage: BreakerSnapshot,
    pub task_id: Option<Uuid>,
    pub resolved: bool,
    pub resolution_note: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_clamps_content() {
        let long = "x".repeat(400);
        let fb = Feedback::new(long, "u1", "en");
        assert_eq!(fb.content.chars().count(), MAX_FEEDBACK_CONTENT);
        assert_eq!(fb.status, FeedbackStatus::Pending);
    }

    #[test]
    fn feedback_keeps_short_content() {
        let fb = Feedback::new("德语翻译不准确", "u1", "zh");
        assert_eq!(fb.content, "德语翻译不准确");
    }

    #[test]
    fn feedback_status_forward_transitions() {
        use FeedbackStatus::*;
        assert!(Pending.can_transition_to(&Analyzing));
        assert!(Analyzing.can_transition_to(&Generating));
        assert!(Testing.can_transition_to(&Generating)); // retry back-edge
        assert!(Publishing.can_transition_to(&Completed));
        assert!(!Pending.can_transition_to(&Publishing));
    }

    #[test]
    fn feedback_status_terminal_is_frozen() {
        use FeedbackStatus::*;
        assert!(!Completed.can_transition_to(&Analyzing));
        assert!(!Failed.can_transition_to(&Pending));
        assert!(!NeedsHuman.can_transition_to(&Failed));
    }

    #[test]
    fn any_active_status_may_fail() {
        use FeedbackStatus::*;
        for s in [Pending, Analyzing, Generating, Modifying, Testing, Publishing] {
            assert!(s.can_transition_to(&Failed));
            assert!(s.can_transition_to(&NeedsHuman));
        }
    }

    #[test]
    fn stage_status_is_monotonic() {
        use StageStatus::*;
        assert!(Started.can_transition_to(&Completed));
        assert!(Started.can_transition_to(&Failed));
        assert!(!Completed.can_transition_to(&Started));
        assert!(!Failed.can_transition_to(&Completed));
    }

    #[test]
    fn stage_name_display_is_kebab() {
        assert_eq!(StageName::AnalyzeIntent.to_string(), "analyze-intent");
        assert_eq!(StageName::CreatePr.to_string(), "create-pr");
    }

    #[test]
    fn test_report_aggregates_cases() {
        let report = TestReport::from_cases(vec![
            CaseResult {
                name: "a".into(),
                status: CaseStatus::Passed,
                error: None,
            },
            CaseResult {
                name: "b".into(),
                status: CaseStatus::Failed,
                error: Some("boom".into()),
            },
        ]);
        assert!(!report.passed);
        assert_eq!(report.tests_run, 2);
        assert_eq!(report.tests_passed, 1);
        assert_eq!(report.tests_failed, 1);
    }

    #[test]
    fn empty_test_report_does_not_pass() {
        let report = TestReport::from_cases(vec![]);
        assert!(!report.passed);
        assert_eq!(report.tests_run, 0);
    }

    #[test]
    fn stage_data_serializes_tagged() {
        let data = StageData::Plan(ChangePlan {
            file: "src/translator.js".into(),
            action: PlanAction::Replace,
            code_block: "export const t = 1;".into(),
            description: "fix".into(),
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "plan");
        assert_eq!(json["value"]["file"], "src/translator.js");
        assert_eq!(json["value"]["action"], "replace");
    }

    #[test]
    fn token_usage_roundtrip() {
        let rec = TokenUsageRecord {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            feedback_id: "fb-1".into(),
            model: "claude-sonnet-4-20250514".into(),
            prompt_tokens: 120,
            completion_tokens: 80,
            call_type: CallType::AnalyzeIntent,
            timestamp: Utc::now(),
            success: true,
            error: None,
        };
        let json = serde_json::to_string(&rec).unwrap();
        let back: TokenUsageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_type, CallType::AnalyzeIntent);
        assert_eq!(back.prompt_tokens, 120);
    }

    #[test]
    fn deny_reason_display() {
        assert_eq!(DenyReason::DailyLimit.to_string(), "daily-limit");
        assert_eq!(DenyReason::CircuitOpen.to_string(), "circuit-open");
    }
}
