//! Pipeline orchestrator.
//!
//! Drives one feedback through analyze → plan → modify → test → publish with
//! exactly one back-edge: a failed test round re-enters at the planner while
//! the retry budget holds. The orchestrator owns every terminal decision --
//! stage services only report results.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use am_bridge::{AgentEvent, FeedbackProcessor, TaskEventSender};
use am_core::types::{
    Feasibility, Feedback, FeedbackResult, FeedbackStatus, StageData, StageRecord, StageStatus,
    TaskRecord, TaskStatus,
};
use am_core::workspace::Workspace;
use am_harness::{ShutdownSignal, TokenBreaker};
use am_intelligence::ModelClient;
use am_store::Store;

use crate::browser::BrowserRunner;
use crate::publish::PublishTarget;
use crate::stages::{
    Analyzer, Modifier, Planner, Publisher, StageContext, StageError, StageService, Tester,
};
use crate::stages::tester::QualityGate;

// ---------------------------------------------------------------------------
// Exit
// ---------------------------------------------------------------------------

/// Terminal decision for one task.
enum Exit {
    /// Pipeline finished; PR published.
    Completed(FeedbackResult),
    /// Analyzer judged the feedback infeasible for automation.
    NeedsHuman(FeedbackResult),
    /// The retry budget ran out without a green test round.
    RetriesExhausted(String),
    /// A stage failed in a way the orchestrator never retries.
    Failed { kind: &'static str, message: String },
    /// Process-wide shutdown interrupted the task.
    Aborted,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    store: Store,
    breaker: TokenBreaker,
    shutdown: ShutdownSignal,
    analyzer: Analyzer,
    planner: Planner,
    modifier: Modifier,
    tester: Tester,
    publisher: Publisher,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        breaker: TokenBreaker,
        model: ModelClient,
        workspace: Arc<Workspace>,
        runner: Arc<dyn BrowserRunner>,
        target: Arc<dyn PublishTarget>,
        gate: QualityGate,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            analyzer: Analyzer::new(model.clone()),
            planner: Planner::new(model.clone()),
            modifier: Modifier::new(workspace),
            tester: Tester::new(model.clone(), runner, breaker.clone(), gate),
            publisher: Publisher::new(model, target),
            store,
            breaker,
            shutdown,
        }
    }

    /// Run the full pipeline for one feedback. Always reaches a terminal
    /// state: the feedback row, the task row, and the event stream are
    /// consistent on every path, and the breaker slot is retired.
    pub async fn process_feedback(&self, feedback: Feedback, events: TaskEventSender) {
        let task = TaskRecord::new(&feedback.id);
        let task_id = task.id;
        self.store.create_task(task);

        events.emit(AgentEvent::Connected {
            feedback_id: feedback.id.clone(),
            task_id,
        });
        info!(feedback_id = %feedback.id, task_id = %task_id, "pipeline started");

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ctx = StageContext::new(task_id, feedback, events, self.store.clone());
        let exit = self.drive(&mut ctx, &mut shutdown_rx).await;
        self.finish(&ctx, exit).await;
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        ctx: &mut StageContext,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Exit {
        // Analyze
        self.set_status(ctx, FeedbackStatus::Analyzing);
        self.emit_stage(ctx, "analyzing", "started");
        if let Err(e) = self.run_stage(ctx, &self.analyzer, shutdown_rx).await {
            return exit_for_error(e);
        }
        self.emit_stage(ctx, "analyzing", "completed");

        let Some(analysis) = ctx.analysis.clone() else {
            return Exit::Failed {
                kind: "internal",
                message: "analyzer produced no analysis".into(),
            };
        };
        if analysis.feasibility == Feasibility::Low {
            info!(task_id = %ctx.task_id, "feasibility low, handing off to a human");
            return Exit::NeedsHuman(FeedbackResult {
                needs_human: true,
                message: analysis.summary,
                pr_url: None,
            });
        }

        // Plan → modify → test, with the single retry back-edge.
        loop {
            self.set_status(ctx, FeedbackStatus::Generating);
            self.emit_stage(ctx, "generating", "started");
            if let Err(e) = self.run_stage(ctx, &self.planner, shutdown_rx).await {
                return exit_for_error(e);
            }
            self.emit_stage(ctx, "generating", "completed");

            self.set_status(ctx, FeedbackStatus::Modifying);
            self.emit_stage(ctx, "modifying", "started");
            if let Err(e) = self.run_stage(ctx, &self.modifier, shutdown_rx).await {
                return exit_for_error(e);
            }
            self.emit_stage(ctx, "modifying", "completed");

            self.set_status(ctx, FeedbackStatus::Testing);
            self.emit_stage(ctx, "testing", "started");
            match self.run_stage(ctx, &self.tester, shutdown_rx).await {
                Ok(()) => {
                    self.emit_stage(ctx, "testing", "completed");
                    break;
                }
                Err(StageError::QualityGate(reason)) => {
                    self.emit_stage(ctx, "testing", "failed");
                    if ctx.can_retry == Some(true) {
                        ctx.attempt += 1;
                        warn!(
                            task_id = %ctx.task_id,
                            attempt = ctx.attempt,
                            reason = %reason,
                            "test round failed, re-entering planner"
                        );
                        continue;
                    }
                    return Exit::RetriesExhausted(reason);
                }
                Err(e) => return exit_for_error(e),
            }
        }

        // Publish: changelog first (its row belongs before create-pr), then
        // the PR record through the usual stage wrapper.
        self.set_status(ctx, FeedbackStatus::Publishing);
        self.emit_stage(ctx, "publishing", "started");
        let changelog = tokio::select! {
            _ = shutdown_rx.recv() => Err(StageError::Cancelled),
            outcome = self.publisher.synthesize_changelog(ctx) => outcome,
        };
        if let Err(e) = changelog {
            return exit_for_error(e);
        }
        if let Err(e) = self.run_stage(ctx, &self.publisher, shutdown_rx).await {
            return exit_for_error(e);
        }
        self.emit_stage(ctx, "publishing", "completed");

        let pr_url = ctx.publication.as_ref().map(|p| p.pr.url.clone());
        Exit::Completed(FeedbackResult {
            needs_human: false,
            message: ctx
                .publication
                .as_ref()
                .map(|p| p.changelog.clone())
                .unwrap_or_default(),
            pr_url,
        })
    }

    /// Run one stage: open the stage row, execute under the shutdown signal,
    /// close the row with the outcome.
    async fn run_stage(
        &self,
        ctx: &mut StageContext,
        service: &dyn StageService,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), StageError> {
        if self.shutdown.is_shutting_down() {
            return Err(StageError::Cancelled);
        }

        let name = service.name();
        if let Err(e) = self
            .store
            .append_stage(ctx.task_id, StageRecord::started(name))
        {
            error!(task_id = %ctx.task_id, error = %e, "could not open stage row");
        }

        let result = tokio::select! {
            _ = shutdown_rx.recv() => Err(StageError::Cancelled),
            outcome = service.run(ctx) => outcome,
        };

        match result {
            Ok(data) => {
                let _ = self
                    .store
                    .finish_stage(ctx.task_id, name, StageStatus::Completed, Some(data));
                Ok(())
            }
            Err(e) => {
                // A failed test round still carries its report into the row.
                let data = match (&e, &ctx.report) {
                    (StageError::QualityGate(_), Some(report)) => {
                        StageData::TestReport(report.clone())
                    }
                    _ => StageData::Note(e.to_string()),
                };
                let _ = self
                    .store
                    .finish_stage(ctx.task_id, name, StageStatus::Failed, Some(data));
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Terminal handling
    // -----------------------------------------------------------------------

    async fn finish(&self, ctx: &StageContext, exit: Exit) {
        let feedback_id = &ctx.feedback.id;
        let task_id = ctx.task_id;

        match exit {
            Exit::Completed(result) => {
                self.set_status(ctx, FeedbackStatus::Completed);
                let _ = self.store.set_feedback_result(feedback_id, result.clone());
                let _ = self.store.finish_task(task_id, TaskStatus::Completed, None);
                info!(task_id = %task_id, "pipeline completed");
                ctx.events.emit(AgentEvent::Complete(result));
            }
            Exit::NeedsHuman(result) => {
                self.set_status(ctx, FeedbackStatus::NeedsHuman);
                let _ = self.store.set_feedback_result(feedback_id, result.clone());
                let _ = self.store.finish_task(task_id, TaskStatus::Completed, None);
                info!(task_id = %task_id, "pipeline handed off to a human");
                ctx.events.emit(AgentEvent::Complete(result));
            }
            Exit::RetriesExhausted(reason) => {
                self.set_status(ctx, FeedbackStatus::NeedsHuman);
                let _ = self.store.set_feedback_result(
                    feedback_id,
                    FeedbackResult {
                        needs_human: true,
                        message: reason.clone(),
                        pr_url: None,
                    },
                );
                let _ = self.store.finish_task(
                    task_id,
                    TaskStatus::Failed,
                    Some(format!("quality-gate-failed: {reason}")),
                );
                warn!(task_id = %task_id, reason = %reason, "retry budget exhausted");
                ctx.events.emit(AgentEvent::Error {
                    kind: "quality-gate-failed".into(),
                    message: reason,
                });
            }
            Exit::Failed { kind, message } => {
                self.set_status(ctx, FeedbackStatus::Failed);
                let _ = self
                    .store
                    .finish_task(task_id, TaskStatus::Failed, Some(message.clone()));
                warn!(task_id = %task_id, kind, error = %message, "pipeline failed");
                ctx.events.emit(AgentEvent::Error {
                    kind: kind.into(),
                    message,
                });
            }
            Exit::Aborted => {
                self.set_status(ctx, FeedbackStatus::Failed);
                let _ = self.store.finish_task(
                    task_id,
                    TaskStatus::Aborted,
                    Some("cancelled by shutdown".into()),
                );
                warn!(task_id = %task_id, "pipeline aborted by shutdown");
                ctx.events.emit(AgentEvent::Error {
                    kind: "cancelled".into(),
                    message: "task aborted by process shutdown".into(),
                });
            }
        }

        ctx.events.emit(AgentEvent::Done);
        // The breaker slot is retired on every exit path.
        self.breaker.finish_task(task_id).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_status(&self, ctx: &StageContext, status: FeedbackStatus) {
        if let Err(e) = self.store.update_feedback_status(&ctx.feedback.id, status) {
            error!(
                feedback_id = %ctx.feedback.id,
                error = %e,
                "feedback status transition rejected"
            );
        }
    }

    fn emit_stage(&self, ctx: &StageContext, stage: &str, status: &str) {
        ctx.events.emit(AgentEvent::Stage {
            stage: stage.into(),
            status: status.into(),
        });
    }
}

fn exit_for_error(e: StageError) -> Exit {
    match e {
        StageError::Cancelled => Exit::Aborted,
        other => Exit::Failed {
            kind: other.kind(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl FeedbackProcessor for Orchestrator {
    async fn process(&self, feedback: Feedback, events: TaskEventSender) {
        self.process_feedback(feedback, events).await;
    }
}
