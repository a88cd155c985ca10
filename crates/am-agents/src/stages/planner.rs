//! Generate-solution stage: turn the analysis into a single-file change plan.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use am_bridge::AgentEvent;
use am_core::types::{CallType, ChangePlan, PlanAction, StageData, StageName};
use am_intelligence::{CallOptions, ModelClient};

use super::{extract_json, Result, StageContext, StageError, StageService};
use crate::prompts;

/// Size of the `code_chunk` slices streamed to the subscriber.
const CODE_CHUNK_CHARS: usize = 240;

pub struct Planner {
    model: ModelClient,
}

impl Planner {
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }
}

#[derive(Deserialize)]
struct PlanWire {
    file: String,
    action: PlanAction,
    #[serde(rename = "codeBlock", alias = "code_block")]
    code_block: String,
    #[serde(default)]
    description: Option<String>,
}

#[async_trait]
impl StageService for Planner {
    fn name(&self) -> StageName {
        StageName::GenerateSolution
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageData> {
        let analysis = ctx
            .analysis
            .as_ref()
            .ok_or(StageError::MissingInput("analysis"))?;

        let messages = prompts::generate_solution(&ctx.feedback, analysis, ctx.attempt);
        let output = self
            .model
            .call(
                &messages,
                &CallOptions {
                    temperature: 0.3,
                    max_tokens: 2048,
                    task_id: ctx.task_id,
                    feedback_id: ctx.feedback.id.clone(),
                    call_type: CallType::GenerateSolution,
                },
            )
            .await?;

        let value = extract_json(&output.content)?;
        let wire: PlanWire = serde_json::from_value(value)
            .map_err(|e| StageError::BadModelOutput(format!("plan shape: {e}")))?;

        let plan = ChangePlan {
            file: wire.file,
            action: wire.action,
            code_block: wire.code_block,
            description: wire
                .description
                .unwrap_or_else(|| format!("address feedback: {}", ctx.feedback.content)),
        };
        info!(
            task_id = %ctx.task_id,
            file = %plan.file,
            action = ?plan.action,
            attempt = ctx.attempt,
            "solution planned"
        );

        // Stream the proposed code in chunks, then the structured suggestion.
        let chars: Vec<char> = plan.code_block.chars().collect();
        for window in chars.chunks(CODE_CHUNK_CHARS) {
            ctx.events.emit(AgentEvent::CodeChunk {
                content: window.iter().collect(),
            });
        }
        ctx.events.emit(AgentEvent::Suggestion(plan.clone()));

        ctx.plan = Some(plan.clone());
        Ok(StageData::Plan(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_bridge::task_stream;
    use am_core::types::{Analysis, Feasibility, Feedback, Intent, Priority};
    use am_harness::{BreakerConfig, NullSink, TokenBreaker};
    use am_intelligence::MockProvider;
    use am_store::Store;
    use std::sync::Arc;
    use uuid::Uuid;

    fn planner_with(provider: MockProvider, store: &Store) -> Planner {
        let breaker = TokenBreaker::new(BreakerConfig::default(), Arc::new(NullSink));
        Planner::new(ModelClient::new(
            Arc::new(provider),
            breaker,
            store.clone(),
            "mock-model",
        ))
    }

    fn context(store: &Store) -> (StageContext, am_bridge::TaskEventReceiver) {
        let (tx, rx) = task_stream(64);
        let mut ctx = StageContext::new(
            Uuid::new_v4(),
            Feedback::new("translations wrong", "u1", "en"),
            tx,
            store.clone(),
        );
        ctx.analysis = Some(Analysis {
            intent: Intent::Accuracy,
            feasibility: Feasibility::High,
            priority: Priority::High,
            impact: "core".into(),
            summary: "bad output".into(),
        });
        (ctx, rx)
    }

    #[tokio::test]
    async fn emits_chunks_then_suggestion() {
        let store = Store::in_memory();
        let long_code = "x".repeat(500);
        let provider = MockProvider::new().with_text(
            format!(
                r#"{{"file":"src/translator.js","action":"replace","codeBlock":"{long_code}","description":"fix dict"}}"#
            ),
            200,
            150,
        );
        let planner = planner_with(provider, &store);
        let (mut ctx, mut rx) = context(&store);

        planner.run(&mut ctx).await.unwrap();

        let mut names = Vec::new();
        while let Some(ev) = rx.try_recv() {
            names.push(ev.name());
        }
        assert!(names.iter().filter(|n| **n == "code_chunk").count() >= 2);
        assert_eq!(*names.last().unwrap(), "suggestion");

        let plan = ctx.plan.unwrap();
        assert_eq!(plan.file, "src/translator.js");
        assert_eq!(plan.action, PlanAction::Replace);
    }

    #[tokio::test]
    async fn missing_analysis_is_an_input_error() {
        let store = Store::in_memory();
        let planner = planner_with(MockProvider::new(), &store);
        let (tx, _rx) = task_stream(8);
        let mut ctx = StageContext::new(
            Uuid::new_v4(),
            Feedback::new("x", "u", "en"),
            tx,
            store.clone(),
        );
        let err = planner.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput("analysis")));
    }
}
