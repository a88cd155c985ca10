//! Apply-changes stage: branch, snapshot, write, commit.
//!
//! The workspace is shared; the whole sequence runs under the workspace
//! mutex so concurrent tasks serialize here. Before any write the tree is
//! snapshotted, and a retry entry first restores the latest pre-modification
//! snapshot so every attempt starts from the same baseline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use am_core::ids;
use am_core::types::{Modification, PlanAction, StageData, StageName};
use am_core::workspace::{Workspace, WriteMode};

use super::{Result, StageContext, StageError, StageService};

pub struct Modifier {
    workspace: Arc<Workspace>,
}

impl Modifier {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl StageService for Modifier {
    fn name(&self) -> StageName {
        StageName::ApplyChanges
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageData> {
        let plan = ctx.plan.clone().ok_or(StageError::MissingInput("plan"))?;

        let _guard = self.workspace.lock().await;

        self.workspace
            .ensure()
            .await
            .map_err(|e| StageError::Workspace(e.to_string()))?;

        if ctx.attempt > 0 {
            if let Some(snapshot_id) = self.workspace.latest_snapshot() {
                self.workspace
                    .restore(&snapshot_id)
                    .map_err(|e| StageError::Workspace(e.to_string()))?;
                info!(task_id = %ctx.task_id, snapshot = %snapshot_id, "restored pre-modification baseline");
            }
        }

        self.workspace
            .snapshot(&format!("pre-modify-{}", ids::short_id(&ctx.feedback.id)))
            .map_err(|e| StageError::Workspace(e.to_string()))?;

        let branch = ids::branch_name(&ctx.feedback.id);
        self.workspace
            .checkout_new_branch(&branch)
            .await
            .map_err(|e| StageError::Workspace(e.to_string()))?;

        // `delete` empties the file; the workspace write contract only knows
        // replace and insert.
        let (content, mode) = match plan.action {
            PlanAction::Replace => (plan.code_block.as_str(), WriteMode::Replace),
            PlanAction::Insert => (plan.code_block.as_str(), WriteMode::Insert),
            PlanAction::Delete => ("", WriteMode::Replace),
        };
        let lines_added = self
            .workspace
            .write_file(&plan.file, content, mode)
            .await
            .map_err(|e| StageError::Workspace(e.to_string()))?;

        let commit_hash = self
            .workspace
            .commit(&format!("fix: {}", plan.description))
            .await
            .map_err(|e| StageError::Workspace(e.to_string()))?;

        info!(
            task_id = %ctx.task_id,
            branch = %branch,
            commit = %commit_hash,
            lines_added,
            "changes applied"
        );

        let modification = Modification {
            branch,
            file: plan.file,
            commit_hash,
            lines_added,
        };
        ctx.modification = Some(modification.clone());
        Ok(StageData::Modification(modification))
    }
}
