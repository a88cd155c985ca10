//! Publishing seam for the Git hosting system.
//!
//! PR creation is an interface: a deployment can plug a real hosting
//! adapter, while the default [`RecordedPublisher`] is an explicit local
//! stub that derives the PR record from the real branch and changelog and
//! never pretends a remote accepted it (the record is marked as local).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use am_core::types::PullRequest;

#[derive(Debug, Clone)]
pub struct PrDraft {
    pub branch: String,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait PublishTarget: Send + Sync {
    async fn create_pr(&self, draft: &PrDraft) -> Result<PullRequest, String>;
}

/// Local stub target. Numbers PRs sequentially and builds the URL from a
/// configured base so downstream consumers see a well-formed record; the
/// `local/` path segment marks it as never having left the process.
pub struct RecordedPublisher {
    base_url: String,
    counter: AtomicU64,
}

impl RecordedPublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for RecordedPublisher {
    fn default() -> Self {
        Self::new("https://git.invalid/auto-mend")
    }
}

#[async_trait]
impl PublishTarget for RecordedPublisher {
    async fn create_pr(&self, draft: &PrDraft) -> Result<PullRequest, String> {
        let number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PullRequest {
            url: format!("{}/local/pull/{number}", self.base_url),
            number,
            branch: draft.branch.clone(),
            title: draft.title.clone(),
            body: draft.body.clone(),
        })
    }
}
