//! Run-tests stage: synthesize cases, execute them, apply the quality gate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use am_bridge::AgentEvent;
use am_core::types::{CallType, StageData, StageName, TestReport};
use am_harness::TokenBreaker;
use am_intelligence::{CallOptions, ModelClient};

use super::{extract_json, Result, StageContext, StageError, StageService};
use crate::browser::{BrowserRunner, TestCase};
use crate::prompts;

// ---------------------------------------------------------------------------
// Quality gate
// ---------------------------------------------------------------------------

/// The conjunction gating publication: every case passed, enough cases ran,
/// and (optionally) the model's confidence score clears a threshold.
#[derive(Debug, Clone)]
pub struct QualityGate {
    pub min_cases: usize,
    pub min_score: Option<f32>,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_cases: 3,
            min_score: None,
        }
    }
}

impl QualityGate {
    pub fn evaluate(&self, report: &TestReport, score: Option<f32>) -> std::result::Result<(), String> {
        if report.tests_passed != report.tests_run {
            return Err(format!(
                "{}/{} cases passed",
                report.tests_passed, report.tests_run
            ));
        }
        if report.tests_run < self.min_cases {
            return Err(format!(
                "only {} cases ran, {} required",
                report.tests_run, self.min_cases
            ));
        }
        if let (Some(threshold), Some(actual)) = (self.min_score, score) {
            if actual < threshold {
                return Err(format!("quality score {actual:.2} below {threshold:.2}"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tester
// ---------------------------------------------------------------------------

pub struct Tester {
    model: ModelClient,
    runner: Arc<dyn BrowserRunner>,
    breaker: TokenBreaker,
    gate: QualityGate,
}

impl Tester {
    pub fn new(
        model: ModelClient,
        runner: Arc<dyn BrowserRunner>,
        breaker: TokenBreaker,
        gate: QualityGate,
    ) -> Self {
        Self {
            model,
            runner,
            breaker,
            gate,
        }
    }

    /// Ask the model for case descriptors; fall back to a canned smoke set
    /// when the output is unusable so one bad completion does not sink the
    /// whole round.
    async fn generate_cases(&self, ctx: &StageContext) -> Result<Vec<TestCase>> {
        let plan = ctx.plan.as_ref().ok_or(StageError::MissingInput("plan"))?;
        let messages = prompts::generate_tests(plan, self.gate.min_cases);
        let output = self
            .model
            .call(
                &messages,
                &CallOptions {
                    temperature: 0.2,
                    max_tokens: 1024,
                    task_id: ctx.task_id,
                    feedback_id: ctx.feedback.id.clone(),
                    call_type: CallType::GenerateTests,
                },
            )
            .await?;

        #[derive(Deserialize)]
        struct CaseWire {
            name: String,
            #[serde(default)]
            description: String,
        }

        let parsed: Option<Vec<CaseWire>> = extract_json(&output.content)
            .ok()
            .and_then(|v| serde_json::from_value(v).ok());

        match parsed {
            Some(wire) if !wire.is_empty() => Ok(wire
                .into_iter()
                .map(|c| TestCase {
                    name: c.name,
                    description: c.description,
                })
                .collect()),
            _ => {
                warn!(task_id = %ctx.task_id, "unusable test-case output, using fallback smoke set");
                Ok(fallback_cases(self.gate.min_cases))
            }
        }
    }

    async fn assess_score(&self, ctx: &StageContext, report: &TestReport) -> Option<f32> {
        self.gate.min_score?;
        let plan = ctx.plan.as_ref()?;
        let messages = prompts::assess_quality(plan, report.tests_passed, report.tests_run);
        let output = self
            .model
            .call(
                &messages,
                &CallOptions {
                    temperature: 0.0,
                    max_tokens: 512,
                    task_id: ctx.task_id,
                    feedback_id: ctx.feedback.id.clone(),
                    call_type: CallType::AssessQuality,
                },
            )
            .await
            .ok()?;
        extract_json(&output.content)
            .ok()
            .and_then(|v| v.get("score").and_then(|s| s.as_f64()))
            .map(|s| s as f32)
    }
}

fn fallback_cases(min_cases: usize) -> Vec<TestCase> {
    let mut cases = vec![
        TestCase {
            name: "page-loads".into(),
            description: "application renders without errors".into(),
        },
        TestCase {
            name: "changed-feature".into(),
            description: "the modified behaviour is reachable".into(),
        },
        TestCase {
            name: "regression-smoke".into(),
            description: "an unrelated page still renders".into(),
        },
    ];
    while cases.len() < min_cases {
        let n = cases.len();
        cases.push(TestCase {
            name: format!("smoke-{n}"),
            description: "additional smoke coverage".into(),
        });
    }
    cases
}

#[async_trait]
impl StageService for Tester {
    fn name(&self) -> StageName {
        StageName::RunTests
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageData> {
        // A missing browser is a quality-gate failure with a structured
        // reason, never a crash.
        if let Err(reason) = self.runner.availability() {
            warn!(task_id = %ctx.task_id, reason = %reason, "test environment missing");
            let report = TestReport::from_cases(vec![]);
            ctx.events.emit(AgentEvent::TestResult(report.clone()));
            ctx.report = Some(report);
            ctx.can_retry = Some(self.breaker.increment_retry(ctx.task_id).await);
            return Err(StageError::QualityGate(format!(
                "test environment missing: {reason}"
            )));
        }

        let cases = self.generate_cases(ctx).await?;
        let total = cases.len();

        let mut details = Vec::with_capacity(total);
        for (index, case) in cases.iter().enumerate() {
            ctx.events.emit(AgentEvent::TestProgress {
                case: case.name.clone(),
                index,
                total,
            });
            details.push(self.runner.run_case(case).await);
        }

        let report = TestReport::from_cases(details);
        let score = self.assess_score(ctx, &report).await;
        let gate = self.gate.evaluate(&report, score);

        info!(
            task_id = %ctx.task_id,
            passed = report.tests_passed,
            run = report.tests_run,
            gate_ok = gate.is_ok(),
            "test round finished"
        );
        ctx.events.emit(AgentEvent::TestResult(report.clone()));
        ctx.report = Some(report.clone());

        match gate {
            Ok(()) => {
                ctx.can_retry = None;
                Ok(StageData::TestReport(report))
            }
            Err(reason) => {
                ctx.can_retry = Some(self.breaker.increment_retry(ctx.task_id).await);
                Err(StageError::QualityGate(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ScriptedRunner;
    use am_bridge::task_stream;
    use am_core::types::{CaseResult, CaseStatus, ChangePlan, Feedback, PlanAction};
    use am_harness::{BreakerConfig, NullSink};
    use am_intelligence::MockProvider;
    use am_store::Store;
    use uuid::Uuid;

    const CASES_JSON: &str = r#"[
        {"name": "german-translation", "description": "German output is accurate"},
        {"name": "page-loads", "description": "page renders"},
        {"name": "regression", "description": "English still works"}
    ]"#;

    fn tester_with(
        provider: MockProvider,
        runner: ScriptedRunner,
        gate: QualityGate,
    ) -> (Tester, TokenBreaker, Store) {
        let store = Store::in_memory();
        let breaker = TokenBreaker::new(BreakerConfig::default(), std::sync::Arc::new(NullSink));
        let model = ModelClient::new(
            Arc::new(provider),
            breaker.clone(),
            store.clone(),
            "mock-model",
        );
        (
            Tester::new(model, Arc::new(runner), breaker.clone(), gate),
            breaker,
            store,
        )
    }

    fn context(store: &Store) -> (StageContext, am_bridge::TaskEventReceiver) {
        let (tx, rx) = task_stream(64);
        let mut ctx = StageContext::new(
            Uuid::new_v4(),
            Feedback::new("bad translation", "u1", "en"),
            tx,
            store.clone(),
        );
        ctx.plan = Some(ChangePlan {
            file: "src/translator.js".into(),
            action: PlanAction::Replace,
            code_block: "x".into(),
            description: "fix dictionary".into(),
        });
        (ctx, rx)
    }

    #[tokio::test]
    async fn all_passing_round_clears_the_gate() {
        let (tester, _breaker, store) = tester_with(
            MockProvider::new().with_text(CASES_JSON, 100, 60),
            ScriptedRunner::passing(),
            QualityGate::default(),
        );
        let (mut ctx, mut rx) = context(&store);

        let data = tester.run(&mut ctx).await.unwrap();
        let StageData::TestReport(report) = data else {
            panic!("unexpected data")
        };
        assert!(report.passed);
        assert_eq!(report.tests_run, 3);

        let mut names = Vec::new();
        while let Some(ev) = rx.try_recv() {
            names.push(ev.name());
        }
        assert_eq!(names.iter().filter(|n| **n == "test_progress").count(), 3);
        assert_eq!(*names.last().unwrap(), "test_result");
    }

    #[tokio::test]
    async fn failing_case_fails_gate_and_increments_retry() {
        let (tester, breaker, store) = tester_with(
            MockProvider::new().with_text(CASES_JSON, 100, 60),
            ScriptedRunner::with_outcomes([true, false, true]),
            QualityGate::default(),
        );
        let (mut ctx, _rx) = context(&store);

        let err = tester.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "quality-gate-failed");
        assert_eq!(ctx.can_retry, Some(true));
        assert_eq!(breaker.retry_count(ctx.task_id).await, 1);
        assert_eq!(ctx.report.as_ref().unwrap().tests_failed, 1);
    }

    #[tokio::test]
    async fn too_few_cases_fails_gate_even_when_green() {
        let (tester, _breaker, store) = tester_with(
            MockProvider::new().with_text(r#"[{"name":"only-one","description":"d"}]"#, 50, 30),
            ScriptedRunner::passing(),
            QualityGate::default(),
        );
        let (mut ctx, _rx) = context(&store);

        let err = tester.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("1 cases ran"));
    }

    #[tokio::test]
    async fn unusable_case_output_falls_back_to_smoke_set() {
        let (tester, _breaker, store) = tester_with(
            MockProvider::new().with_text("no json here", 20, 5),
            ScriptedRunner::passing(),
            QualityGate::default(),
        );
        let (mut ctx, _rx) = context(&store);

        tester.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.report.unwrap().tests_run, 3);
    }

    #[tokio::test]
    async fn missing_browser_is_structured_gate_failure() {
        let (tester, breaker, store) = tester_with(
            MockProvider::new(),
            ScriptedRunner::unavailable("binary not found"),
            QualityGate::default(),
        );
        let (mut ctx, _rx) = context(&store);

        let err = tester.run(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "quality-gate-failed");
        assert!(err.to_string().contains("test environment missing"));
        assert_eq!(breaker.retry_count(ctx.task_id).await, 1);
    }

    #[tokio::test]
    async fn score_threshold_applies_when_configured() {
        let (tester, _breaker, store) = tester_with(
            MockProvider::new()
                .with_text(CASES_JSON, 100, 60)
                .with_text(r#"{"score": 0.4}"#, 20, 10),
            ScriptedRunner::passing(),
            QualityGate {
                min_cases: 3,
                min_score: Some(0.8),
            },
        );
        let (mut ctx, _rx) = context(&store);

        let err = tester.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("quality score"));
    }

    #[test]
    fn gate_rejects_empty_report() {
        let gate = QualityGate::default();
        let report = TestReport::from_cases(vec![]);
        assert!(gate.evaluate(&report, None).is_err());
    }

    #[test]
    fn gate_accepts_full_pass() {
        let gate = QualityGate::default();
        let report = TestReport::from_cases(
            (0..3)
                .map(|i| CaseResult {
                    name: format!("case-{i}"),
                    status: CaseStatus::Passed,
                    error: None,
                })
                .collect(),
        );
        assert!(gate.evaluate(&report, None).is_ok());
    }
}
