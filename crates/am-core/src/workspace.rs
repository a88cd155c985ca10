//! Scoped git workspace with a pre-modification snapshot ring.
//!
//! One shared working directory bound to a remote repository. Mutating
//! callers serialize on [`Workspace::lock`]; git invocations shell out with a
//! wall-clock guard so a wedged subprocess cannot stall a task forever.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::WorkspaceSettings;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("git command timed out: {0}")]
    GitTimeout(String),
    #[error("workspace repository URL is not configured")]
    NotConfigured,
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

// ---------------------------------------------------------------------------
// Write modes and snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace the file's content entirely (creating it if absent).
    Replace,
    /// Append the content plus a trailing newline to any existing content.
    Insert,
}

/// Deep copy of the configured file-set, addressable by id.
struct Snapshot {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    /// Relative path → content; `None` records that the file did not exist.
    files: HashMap<String, Option<Vec<u8>>>,
}

/// Listing view of a snapshot (contents stay private).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Shared working directory. Only one mutator may operate at a time; callers
/// that write must hold the guard returned by [`Workspace::lock`] for the
/// whole checkout → write → commit sequence.
pub struct Workspace {
    settings: WorkspaceSettings,
    command_timeout: Duration,
    mutate_lock: tokio::sync::Mutex<()>,
    snapshots: std::sync::Mutex<VecDeque<Snapshot>>,
}

impl Workspace {
    pub fn new(settings: WorkspaceSettings) -> Self {
        Self {
            settings,
            command_timeout: Duration::from_secs(60),
            mutate_lock: tokio::sync::Mutex::new(()),
            snapshots: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.settings.work_dir
    }

    /// Serialize mutating access. Concurrent tasks that reach the modify
    /// stage queue here.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.mutate_lock.lock().await
    }

    // -----------------------------------------------------------------------
    // Git operations
    // -----------------------------------------------------------------------

    /// Clone the repository if the working directory is not yet a checkout.
    /// Idempotent.
    pub async fn ensure(&self) -> Result<()> {
        if self.settings.work_dir.join(".git").exists() {
            debug!(dir = %self.settings.work_dir.display(), "workspace already cloned");
            return Ok(());
        }
        if self.settings.repo_url.is_empty() {
            return Err(WorkspaceError::NotConfigured);
        }
        if let Some(parent) = self.settings.work_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(repo = %self.settings.repo_url, "cloning workspace");
        self.run_git_in(
            Path::new("."),
            &[
                "clone",
                &self.settings.repo_url,
                &self.settings.work_dir.display().to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Create and check out a new branch.
    pub async fn checkout_new_branch(&self, name: &str) -> Result<()> {
        self.run_git(&["checkout", "-b", name]).await?;
        info!(branch = name, "checked out new branch");
        Ok(())
    }

    /// Write `content` to `rel_path` inside the working directory. Returns
    /// the number of lines written.
    pub async fn write_file(
        &self,
        rel_path: &str,
        content: &str,
        mode: WriteMode,
    ) -> Result<usize> {
        let path = self.settings.work_dir.join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match mode {
            WriteMode::Replace => {
                std::fs::write(&path, content)?;
            }
            WriteMode::Insert => {
                let mut existing = if path.exists() {
                    std::fs::read_to_string(&path)?
                } else {
                    String::new()
                };
                if !existing.is_empty() && !existing.ends_with('\n') {
                    existing.push('\n');
                }
                existing.push_str(content);
                existing.push('\n');
                std::fs::write(&path, existing)?;
            }
        }
        Ok(content.lines().count())
    }

    /// Stage everything and commit. Returns the new commit hash.
    ///
    /// Empty commits are allowed: a retry that restores the baseline and
    /// re-applies the same content must still produce a commit to anchor
    /// its branch.
    pub async fn commit(&self, message: &str) -> Result<String> {
        self.run_git(&["add", "-A"]).await?;
        self.run_git(&["commit", "--allow-empty", "-m", message]).await?;
        let hash = self.run_git(&["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    // -----------------------------------------------------------------------
    // Snapshot ring
    // -----------------------------------------------------------------------

    /// Deep-copy the configured file-set into the snapshot ring. Oldest
    /// snapshots are evicted past the configured limit. Returns the
    /// snapshot id.
    pub fn snapshot(&self, name: &str) -> Result<String> {
        let mut files = HashMap::new();
        for entry in &self.settings.snapshot_files {
            let abs = self.settings.work_dir.join(entry);
            collect_files(&self.settings.work_dir, &abs, entry, &mut files)?;
        }
        let id = Uuid::new_v4().as_simple().to_string()[..12].to_string();
        let snap = Snapshot {
            id: id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
            files,
        };

        let mut ring = self.snapshots.lock().expect("snapshot lock poisoned");
        ring.push_back(snap);
        while ring.len() > self.settings.max_snapshots.max(1) {
            ring.pop_front();
        }
        info!(snapshot = %id, name, "workspace snapshot taken");
        Ok(id)
    }

    /// Restore every file recorded in the snapshot byte-for-byte. Files the
    /// snapshot recorded as absent are removed.
    pub fn restore(&self, id: &str) -> Result<()> {
        let ring = self.snapshots.lock().expect("snapshot lock poisoned");
        let snap = ring
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| WorkspaceError::SnapshotNotFound(id.to_string()))?;

        for (rel, content) in &snap.files {
            let path = self.settings.work_dir.join(rel);
            match content {
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, bytes)?;
                }
                None => {
                    if path.exists() {
                        std::fs::remove_file(&path)?;
                    }
                }
            }
        }
        info!(snapshot = %id, "workspace restored");
        Ok(())
    }

    /// Id of the most recent snapshot, if any.
    pub fn latest_snapshot(&self) -> Option<String> {
        let ring = self.snapshots.lock().expect("snapshot lock poisoned");
        ring.back().map(|s| s.id.clone())
    }

    pub fn list_snapshots(&self) -> Vec<SnapshotInfo> {
        let ring = self.snapshots.lock().expect("snapshot lock poisoned");
        ring.iter()
            .map(|s| SnapshotInfo {
                id: s.id.clone(),
                name: s.name.clone(),
                created_at: s.created_at,
                file_count: s.files.len(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        self.run_git_in(&self.settings.work_dir, args).await
    }

    async fn run_git_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut cmd = tokio::process::Command::new("git");
        cmd.args(args).current_dir(dir);
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| WorkspaceError::GitTimeout(args.join(" ")))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::GitCommand(format!(
                "git {}: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Walk `abs` (file or directory), recording every regular file under it into
/// `files` keyed by its path relative to `root`. A missing entry is recorded
/// as `None` so a restore can delete files created afterwards.
fn collect_files(
    root: &Path,
    abs: &Path,
    rel: &str,
    files: &mut HashMap<String, Option<Vec<u8>>>,
) -> Result<()> {
    if !abs.exists() {
        files.insert(rel.to_string(), None);
        return Ok(());
    }
    if abs.is_file() {
        files.insert(rel.to_string(), Some(std::fs::read(abs)?));
        return Ok(());
    }
    for entry in std::fs::read_dir(abs)? {
        let entry = entry?;
        let path = entry.path();
        let child_rel = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.display().to_string());
        collect_files(root, &path, &child_rel, files)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
