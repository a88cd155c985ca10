//! Analyze-intent stage: classify the feedback and decide feasibility.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use am_bridge::AgentEvent;
use am_core::types::{Analysis, CallType, Feasibility, Intent, Priority, StageData, StageName};
use am_intelligence::{CallOptions, ModelClient};

use super::{extract_json, Result, StageContext, StageError, StageService};
use crate::prompts;

pub struct Analyzer {
    model: ModelClient,
}

impl Analyzer {
    pub fn new(model: ModelClient) -> Self {
        Self { model }
    }
}

/// Lenient wire shape for the model's JSON.
#[derive(Deserialize)]
struct AnalysisWire {
    intent: Intent,
    feasibility: Feasibility,
    #[serde(default)]
    priority: Option<Priority>,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

#[async_trait]
impl StageService for Analyzer {
    fn name(&self) -> StageName {
        StageName::AnalyzeIntent
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageData> {
        let messages = prompts::analyze_intent(&ctx.feedback);
        let output = self
            .model
            .call(
                &messages,
                &CallOptions {
                    temperature: 0.1,
                    max_tokens: 1024,
                    task_id: ctx.task_id,
                    feedback_id: ctx.feedback.id.clone(),
                    call_type: CallType::AnalyzeIntent,
                },
            )
            .await?;

        let value = extract_json(&output.content)?;
        let wire: AnalysisWire = serde_json::from_value(value)
            .map_err(|e| StageError::BadModelOutput(format!("analysis shape: {e}")))?;

        let analysis = Analysis {
            intent: wire.intent,
            feasibility: wire.feasibility,
            priority: wire.priority.unwrap_or(Priority::Medium),
            impact: wire.impact.unwrap_or_default(),
            summary: wire
                .summary
                .unwrap_or_else(|| ctx.feedback.content.clone()),
        };
        info!(
            task_id = %ctx.task_id,
            intent = ?analysis.intent,
            feasibility = ?analysis.feasibility,
            "feedback analyzed"
        );

        ctx.events.emit(AgentEvent::Intent(analysis.clone()));
        ctx.analysis = Some(analysis.clone());
        Ok(StageData::Analysis(analysis))
    }
}
