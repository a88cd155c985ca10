//! Publish stages: changelog synthesis, then the PR record.
//!
//! One service covers the two final stage rows. The orchestrator calls
//! [`Publisher::synthesize_changelog`] first (that sub-step owns its own
//! stage row), then runs the service for the create-pr row.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use am_bridge::AgentEvent;
use am_core::types::{
    CallType, Publication, StageData, StageName, StageRecord, StageStatus,
};
use am_intelligence::{CallOptions, ModelClient};

use super::{Result, StageContext, StageError, StageService};
use crate::prompts;
use crate::publish::{PrDraft, PublishTarget};

pub struct Publisher {
    model: ModelClient,
    target: Arc<dyn PublishTarget>,
}

impl Publisher {
    pub fn new(model: ModelClient, target: Arc<dyn PublishTarget>) -> Self {
        Self { model, target }
    }

    /// Synthesize the changelog, writing the generate-changelog stage row.
    /// The result lands in `ctx.changelog` for the create-pr step.
    pub async fn synthesize_changelog(&self, ctx: &mut StageContext) -> Result<()> {
        let plan = ctx.plan.as_ref().ok_or(StageError::MissingInput("plan"))?;

        let _ = ctx.store.append_stage(
            ctx.task_id,
            StageRecord::started(StageName::GenerateChangelog),
        );

        let messages = prompts::generate_changelog(&ctx.feedback, plan);
        let outcome = self
            .model
            .call(
                &messages,
                &CallOptions {
                    temperature: 0.4,
                    max_tokens: 1024,
                    task_id: ctx.task_id,
                    feedback_id: ctx.feedback.id.clone(),
                    call_type: CallType::GenerateChangelog,
                },
            )
            .await;

        match outcome {
            Ok(output) => {
                let changelog = output.content.trim().to_string();
                let _ = ctx.store.finish_stage(
                    ctx.task_id,
                    StageName::GenerateChangelog,
                    StageStatus::Completed,
                    Some(StageData::Note(changelog.clone())),
                );
                ctx.changelog = Some(changelog);
                Ok(())
            }
            Err(e) => {
                let _ = ctx.store.finish_stage(
                    ctx.task_id,
                    StageName::GenerateChangelog,
                    StageStatus::Failed,
                    Some(StageData::Note(e.to_string())),
                );
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl StageService for Publisher {
    fn name(&self) -> StageName {
        StageName::CreatePr
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageData> {
        let modification = ctx
            .modification
            .clone()
            .ok_or(StageError::MissingInput("modification"))?;
        let changelog = ctx
            .changelog
            .clone()
            .ok_or(StageError::MissingInput("changelog"))?;

        let title = ctx
            .plan
            .as_ref()
            .map(|p| format!("fix: {}", p.description))
            .unwrap_or_else(|| "fix: automated change".into());
        let draft = PrDraft {
            branch: modification.branch.clone(),
            title,
            body: changelog.clone(),
        };
        let pr = self
            .target
            .create_pr(&draft)
            .await
            .map_err(StageError::Workspace)?;

        info!(
            task_id = %ctx.task_id,
            pr = %pr.url,
            branch = %pr.branch,
            "pull request recorded"
        );
        ctx.events.emit(AgentEvent::Pr(pr.clone()));

        let publication = Publication { changelog, pr };
        ctx.publication = Some(publication.clone());
        Ok(StageData::Publication(publication))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::RecordedPublisher;
    use am_bridge::task_stream;
    use am_core::types::{ChangePlan, Feedback, Modification, PlanAction, TaskRecord};
    use am_harness::{BreakerConfig, NullSink, TokenBreaker};
    use am_intelligence::MockProvider;
    use am_store::Store;
    use uuid::Uuid;

    fn publisher_with(provider: MockProvider, store: &Store) -> Publisher {
        let breaker = TokenBreaker::new(BreakerConfig::default(), Arc::new(NullSink));
        let model = ModelClient::new(Arc::new(provider), breaker, store.clone(), "mock-model");
        Publisher::new(model, Arc::new(RecordedPublisher::default()))
    }

    fn context(store: &Store) -> (StageContext, am_bridge::TaskEventReceiver) {
        let task = TaskRecord::new("fb-1");
        let task_id = task.id;
        store.create_task(task);

        let (tx, rx) = task_stream(64);
        let mut ctx = StageContext::new(
            task_id,
            Feedback::new("bad translation", "u1", "en"),
            tx,
            store.clone(),
        );
        ctx.plan = Some(ChangePlan {
            file: "src/translator.js".into(),
            action: PlanAction::Replace,
            code_block: "x".into(),
            description: "rebuild German dictionary".into(),
        });
        ctx.modification = Some(Modification {
            branch: "feedback-abc123-1000".into(),
            file: "src/translator.js".into(),
            commit_hash: "a".repeat(40),
            lines_added: 12,
        });
        (ctx, rx)
    }

    #[tokio::test]
    async fn publishes_changelog_then_pr_record() {
        let store = Store::in_memory();
        let publisher = publisher_with(
            MockProvider::new().with_text("Fixed German dictionary lookups.", 80, 40),
            &store,
        );
        let (mut ctx, mut rx) = context(&store);

        publisher.synthesize_changelog(&mut ctx).await.unwrap();
        let data = publisher.run(&mut ctx).await.unwrap();

        let StageData::Publication(publication) = data else {
            panic!("unexpected data")
        };
        assert_eq!(publication.changelog, "Fixed German dictionary lookups.");
        assert_eq!(publication.pr.branch, "feedback-abc123-1000");
        assert!(publication.pr.title.contains("German dictionary"));
        assert_eq!(rx.try_recv().unwrap().name(), "pr");

        // The changelog sub-step wrote its own stage row.
        let task = store.get_task(ctx.task_id).unwrap();
        assert!(task
            .stages
            .iter()
            .any(|s| s.name == StageName::GenerateChangelog
                && s.status == StageStatus::Completed));
    }

    #[tokio::test]
    async fn pr_without_changelog_is_an_input_error() {
        let store = Store::in_memory();
        let publisher = publisher_with(MockProvider::new(), &store);
        let (mut ctx, _rx) = context(&store);

        assert!(matches!(
            publisher.run(&mut ctx).await.unwrap_err(),
            StageError::MissingInput("changelog")
        ));
    }

    #[tokio::test]
    async fn missing_modification_is_an_input_error() {
        let store = Store::in_memory();
        let publisher = publisher_with(MockProvider::new(), &store);
        let (tx, _rx) = task_stream(8);
        let mut ctx = StageContext::new(
            Uuid::new_v4(),
            Feedback::new("x", "u", "en"),
            tx,
            store.clone(),
        );
        assert!(matches!(
            publisher.run(&mut ctx).await.unwrap_err(),
            StageError::MissingInput("modification")
        ));
    }
}
