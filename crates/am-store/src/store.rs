//! The store facade.
//!
//! All records live in one document guarded by a `RwLock`. Append-only lists
//! are ring-bounded (oldest evicted); feedback and task rows are mutated only
//! through the transition-checking methods here. In file mode the whole
//! document is rewritten atomically (temp file + rename) by the flush loop
//! and on terminal transitions.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use am_core::config::{DbMode, StoreConfig};
use am_core::types::{
    BreakerEventRecord, Feedback, FeedbackResult, FeedbackStatus, StageData, StageRecord,
    StageStatus, TaskRecord, TaskStatus, TokenUsageRecord,
};
use am_harness::BreakerSink;

const FEEDBACK_CAP: usize = 5_000;
const TASK_CAP: usize = 5_000;
const TOKEN_USAGE_CAP: usize = 10_000;
const BREAKER_EVENT_CAP: usize = 5_000;
const DEFAULT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The persisted document. Field names match the on-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    feedback: VecDeque<Feedback>,
    tasks: VecDeque<TaskRecord>,
    token_usage: VecDeque<TokenUsageRecord>,
    breaker_events: VecDeque<BreakerEventRecord>,
    settings: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Queries and pages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FeedbackQuery {
    pub limit: Option<usize>,
    pub offset: usize,
    pub status: Option<FeedbackStatus>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub limit: Option<usize>,
    pub offset: usize,
    pub task_id: Option<Uuid>,
    pub feedback_id: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsageQuery {
    pub limit: Option<usize>,
    pub offset: usize,
    pub task_id: Option<Uuid>,
    pub feedback_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct BreakerEventQuery {
    pub limit: Option<usize>,
    pub offset: usize,
    pub service: Option<String>,
    pub unresolved_only: bool,
    pub since: Option<DateTime<Utc>>,
}

/// A bounded slice of a list plus the total number of matches.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: usize,
}

/// Aggregates computed on read over a filtered token-usage slice.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAggregates {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub by_model: HashMap<String, u64>,
    pub by_call_type: HashMap<String, u64>,
    pub success_count: usize,
    pub failure_count: usize,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared handle to the record store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<StoreData>>,
    mode: DbMode,
    data_path: Option<PathBuf>,
    flush_interval: Duration,
}

impl Store {
    /// Open the store. In file mode an existing document at
    /// `<data_dir>/database.json` is loaded; a corrupt document is logged and
    /// replaced rather than aborting startup.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let (data_path, data) = match config.mode {
            DbMode::Memory => (None, StoreData::default()),
            DbMode::File => {
                std::fs::create_dir_all(&config.data_dir)?;
                let path = config.data_dir.join("database.json");
                let data = if path.exists() {
                    match std::fs::read_to_string(&path)
                        .map_err(StoreError::from)
                        .and_then(|text| serde_json::from_str(&text).map_err(StoreError::from))
                    {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(error = %e, "database.json unreadable, starting empty");
                            StoreData::default()
                        }
                    }
                } else {
                    StoreData::default()
                };
                (Some(path), data)
            }
        };

        info!(mode = ?config.mode, "store opened");
        Ok(Self {
            inner: Arc::new(RwLock::new(data)),
            mode: config.mode,
            data_path,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
        })
    }

    /// In-memory store for tests and the default deployment.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreData::default())),
            mode: DbMode::Memory,
            data_path: None,
            flush_interval: Duration::from_secs(30),
        }
    }

    pub fn mode(&self) -> DbMode {
        self.mode
    }

    // -----------------------------------------------------------------------
    // Feedback
    // -----------------------------------------------------------------------

    pub fn create_feedback(&self, feedback: Feedback) {
        let mut data = self.write();
        data.feedback.push_back(feedback);
        while data.feedback.len() > FEEDBACK_CAP {
            data.feedback.pop_front();
        }
    }

    pub fn get_feedback(&self, id: &str) -> Option<Feedback> {
        self.read().feedback.iter().find(|f| f.id == id).cloned()
    }

    /// Move a feedback to `status`, rejecting transitions the lifecycle does
    /// not permit. Terminal transitions flush the document in file mode.
    pub fn update_feedback_status(&self, id: &str, status: FeedbackStatus) -> Result<()> {
        let terminal = {
            let mut data = self.write();
            let fb = data
                .feedback
                .iter_mut()
                .find(|f| f.id == id)
                .ok_or_else(|| StoreError::NotFound(format!("feedback {id}")))?;
            if !fb.status.can_transition_to(&status) {
                return Err(StoreError::InvalidTransition {
                    from: format!("{:?}", fb.status),
                    to: format!("{status:?}"),
                });
            }
            fb.status = status;
            status.is_terminal()
        };
        if terminal {
            self.flush_if_file();
        }
        Ok(())
    }

    pub fn set_feedback_result(&self, id: &str, result: FeedbackResult) -> Result<()> {
        let mut data = self.write();
        let fb = data
            .feedback
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("feedback {id}")))?;
        fb.result = Some(result);
        Ok(())
    }

    pub fn list_feedback(&self, query: &FeedbackQuery) -> Page<Feedback> {
        let data = self.read();
        let matches: Vec<&Feedback> = data
            .feedback
            .iter()
            .rev() // newest first
            .filter(|f| query.status.map_or(true, |s| f.status == s))
            .filter(|f| {
                query
                    .language
                    .as_deref()
                    .map_or(true, |l| f.language == l)
            })
            .collect();
        page(&matches, query.offset, query.limit)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn create_task(&self, task: TaskRecord) {
        let mut data = self.write();
        data.tasks.push_back(task);
        while data.tasks.len() > TASK_CAP {
            data.tasks.pop_front();
        }
    }

    pub fn get_task(&self, id: Uuid) -> Option<TaskRecord> {
        self.read().tasks.iter().find(|t| t.id == id).cloned()
    }

    /// Append a stage row to a task. Stage rows are append-only.
    pub fn append_stage(&self, task_id: Uuid, stage: StageRecord) -> Result<()> {
        let mut data = self.write();
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        task.stages.push(stage);
        Ok(())
    }

    /// Close the most recent still-open stage row named `name`.
    pub fn finish_stage(
        &self,
        task_id: Uuid,
        name: am_core::types::StageName,
        status: StageStatus,
        stage_data: Option<StageData>,
    ) -> Result<()> {
        let mut data = self.write();
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        let stage = task
            .stages
            .iter_mut()
            .rev()
            .find(|s| s.name == name && s.status == StageStatus::Started)
            .ok_or_else(|| StoreError::NotFound(format!("open stage {name} on task {task_id}")))?;
        if !stage.status.can_transition_to(&status) {
            return Err(StoreError::InvalidTransition {
                from: format!("{:?}", stage.status),
                to: format!("{status:?}"),
            });
        }
        stage.status = status;
        stage.ended_at = Some(Utc::now().max(stage.started_at));
        if stage_data.is_some() {
            stage.data = stage_data;
        }
        Ok(())
    }

    /// Terminal task transition; flushes in file mode.
    pub fn finish_task(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<()> {
        {
            let mut data = self.write();
            let task = data
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
            task.status = status;
            task.completed_at = Some(Utc::now());
            task.error = error;
        }
        self.flush_if_file();
        Ok(())
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> Page<TaskRecord> {
        let data = self.read();
        let matches: Vec<&TaskRecord> = data
            .tasks
            .iter()
            .rev()
            .filter(|t| query.task_id.map_or(true, |id| t.id == id))
            .filter(|t| {
                query
                    .feedback_id
                    .as_deref()
                    .map_or(true, |f| t.feedback_id == f)
            })
            .filter(|t| query.status.map_or(true, |s| t.status == s))
            .collect();
        page(&matches, query.offset, query.limit)
    }

    // -----------------------------------------------------------------------
    // Token usage
    // -----------------------------------------------------------------------

    pub fn append_token_usage(&self, record: TokenUsageRecord) {
        let mut data = self.write();
        data.token_usage.push_back(record);
        while data.token_usage.len() > TOKEN_USAGE_CAP {
            data.token_usage.pop_front();
        }
    }

    pub fn list_token_usage(
        &self,
        query: &TokenUsageQuery,
    ) -> (Page<TokenUsageRecord>, UsageAggregates) {
        let data = self.read();
        let matches: Vec<&TokenUsageRecord> = data
            .token_usage
            .iter()
            .rev()
            .filter(|r| query.task_id.map_or(true, |id| r.task_id == id))
            .filter(|r| {
                query
                    .feedback_id
                    .as_deref()
                    .map_or(true, |f| r.feedback_id == f)
            })
            .filter(|r| query.since.map_or(true, |t| r.timestamp >= t))
            .filter(|r| query.until.map_or(true, |t| r.timestamp <= t))
            .collect();

        let mut agg = UsageAggregates::default();
        for r in &matches {
            agg.total_prompt_tokens += r.prompt_tokens;
            agg.total_completion_tokens += r.completion_tokens;
            *agg.by_model.entry(r.model.clone()).or_default() +=
                r.prompt_tokens + r.completion_tokens;
            *agg.by_call_type.entry(r.call_type.to_string()).or_default() +=
                r.prompt_tokens + r.completion_tokens;
            if r.success {
                agg.success_count += 1;
            } else {
                agg.failure_count += 1;
            }
        }

        (page(&matches, query.offset, query.limit), agg)
    }

    // -----------------------------------------------------------------------
    // Breaker events
    // -----------------------------------------------------------------------

    pub fn append_breaker_event(&self, event: BreakerEventRecord) {
        let mut data = self.write();
        data.breaker_events.push_back(event);
        while data.breaker_events.len() > BREAKER_EVENT_CAP {
            data.breaker_events.pop_front();
        }
    }

    /// The only mutation breaker events permit: mark resolved with a note.
    pub fn resolve_breaker_event(&self, id: Uuid, note: impl Into<String>) -> Result<()> {
        let mut data = self.write();
        let event = data
            .breaker_events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("breaker event {id}")))?;
        event.resolved = true;
        event.resolution_note = Some(note.into());
        Ok(())
    }

    pub fn list_breaker_events(&self, query: &BreakerEventQuery) -> Page<BreakerEventRecord> {
        let data = self.read();
        let matches: Vec<&BreakerEventRecord> = data
            .breaker_events
            .iter()
            .rev()
            .filter(|e| {
                query
                    .service
                    .as_deref()
                    .map_or(true, |s| e.service == s)
            })
            .filter(|e| !query.unresolved_only || !e.resolved)
            .filter(|e| query.since.map_or(true, |t| e.timestamp >= t))
            .collect();
        page(&matches, query.offset, query.limit)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.read().settings.get(key).cloned()
    }

    pub fn set_setting(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().settings.insert(key.into(), value.into());
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Rewrite the document atomically: serialize to a temp file next to the
    /// target, then rename over it.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        let json = {
            let data = self.read();
            serde_json::to_string_pretty(&*data)?
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "store flushed");
        Ok(())
    }

    fn flush_if_file(&self) {
        if self.mode == DbMode::File {
            if let Err(e) = self.flush() {
                warn!(error = %e, "store flush failed");
            }
        }
    }

    /// Spawn the periodic flush loop (no-op handle in memory mode).
    pub fn spawn_flush_loop(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        let interval = self.flush_interval;
        tokio::spawn(async move {
            if store.mode != DbMode::File {
                return;
            }
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(e) = store.flush() {
                    warn!(error = %e, "periodic store flush failed");
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Lock helpers
    // -----------------------------------------------------------------------

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreData> {
        self.inner.read().expect("store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreData> {
        self.inner.write().expect("store lock poisoned")
    }
}

impl BreakerSink for Store {
    fn record_event(&self, event: BreakerEventRecord) {
        self.append_breaker_event(event);
    }
}

fn page<T: Clone>(matches: &[&T], offset: usize, limit: Option<usize>) -> Page<T> {
    let total = matches.len();
    let list = matches
        .iter()
        .skip(offset)
        .take(limit.unwrap_or(DEFAULT_LIMIT))
        .map(|r| (*r).clone())
        .collect();
    Page { list, total }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use am_core::types::{CallType, StageName};

    fn usage(feedback_id: &str, task_id: Uuid, success: bool, tokens: u64) -> TokenUsageRecord {
        TokenUsageRecord {
            id: Uuid::new_v4(),
            task_id,
            feedback_id: feedback_id.into(),
            model: "claude-sonnet-4-20250514".into(),
            prompt_tokens: tokens,
            completion_tokens: tokens / 2,
            call_type: CallType::AnalyzeIntent,
            timestamp: Utc::now(),
            success,
            error: if success { None } else { Some("timeout".into()) },
        }
    }

    #[test]
    fn feedback_crud_and_listing() {
        let store = Store::in_memory();
        let fb = Feedback::new("slow page", "u1", "en");
        let id = fb.id.clone();
        store.create_feedback(fb);

        assert!(store.get_feedback(&id).is_some());
        store
            .update_feedback_status(&id, FeedbackStatus::Analyzing)
            .unwrap();

        let pg = store.list_feedback(&FeedbackQuery {
            status: Some(FeedbackStatus::Analyzing),
            ..Default::default()
        });
        assert_eq!(pg.total, 1);
        assert_eq!(pg.list[0].id, id);
    }

    #[test]
    fn feedback_rejects_invalid_transition() {
        let store = Store::in_memory();
        let fb = Feedback::new("x", "u1", "en");
        let id = fb.id.clone();
        store.create_feedback(fb);

        let err = store
            .update_feedback_status(&id, FeedbackStatus::Publishing)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn list_feedback_filters_by_language() {
        let store = Store::in_memory();
        store.create_feedback(Feedback::new("a", "u", "de"));
        store.create_feedback(Feedback::new("b", "u", "en"));
        store.create_feedback(Feedback::new("c", "u", "de"));

        let pg = store.list_feedback(&FeedbackQuery {
            language: Some("de".into()),
            ..Default::default()
        });
        assert_eq!(pg.total, 2);
    }

    #[test]
    fn list_feedback_newest_first_with_offset() {
        let store = Store::in_memory();
        for i in 0..5 {
            store.create_feedback(Feedback::new(format!("fb-{i}"), "u", "en"));
        }
        let pg = store.list_feedback(&FeedbackQuery {
            limit: Some(2),
            offset: 1,
            ..Default::default()
        });
        assert_eq!(pg.total, 5);
        assert_eq!(pg.list.len(), 2);
        assert_eq!(pg.list[0].content, "fb-3");
    }

    #[test]
    fn task_stage_lifecycle() {
        let store = Store::in_memory();
        let task = TaskRecord::new("fb-1");
        let task_id = task.id;
        store.create_task(task);

        store
            .append_stage(task_id, StageRecord::started(StageName::AnalyzeIntent))
            .unwrap();
        store
            .finish_stage(
                task_id,
                StageName::AnalyzeIntent,
                StageStatus::Completed,
                None,
            )
            .unwrap();
        store
            .finish_task(task_id, TaskStatus::Completed, None)
            .unwrap();

        let task = store.get_task(task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.stages.len(), 1);
        let stage = &task.stages[0];
        assert_eq!(stage.status, StageStatus::Completed);
        assert!(stage.ended_at.unwrap() >= stage.started_at);
    }

    #[test]
    fn finish_stage_requires_open_row() {
        let store = Store::in_memory();
        let task = TaskRecord::new("fb-1");
        let task_id = task.id;
        store.create_task(task);

        let err = store
            .finish_stage(task_id, StageName::RunTests, StageStatus::Failed, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn token_usage_aggregates() {
        let store = Store::in_memory();
        let t1 = Uuid::new_v4();
        store.append_token_usage(usage("fb-1", t1, true, 100));
        store.append_token_usage(usage("fb-1", t1, false, 0));
        store.append_token_usage(usage("fb-2", Uuid::new_v4(), true, 60));

        let (pg, agg) = store.list_token_usage(&TokenUsageQuery {
            feedback_id: Some("fb-1".into()),
            ..Default::default()
        });
        assert_eq!(pg.total, 2);
        assert_eq!(agg.success_count, 1);
        assert_eq!(agg.failure_count, 1);
        assert_eq!(agg.total_prompt_tokens, 100);
        assert_eq!(agg.by_call_type["analyze_intent"], 150);
    }

    #[test]
    fn token_usage_cap_evicts_oldest() {
        let store = Store::in_memory();
        for _ in 0..(TOKEN_USAGE_CAP + 10) {
            store.append_token_usage(usage("fb", Uuid::new_v4(), true, 1));
        }
        let (pg, _) = store.list_token_usage(&TokenUsageQuery {
            limit: Some(TOKEN_USAGE_CAP * 2),
            ..Default::default()
        });
        assert_eq!(pg.total, TOKEN_USAGE_CAP);
    }

    #[test]
    fn breaker_event_resolution() {
        use am_core::types::{BreakerSnapshot, CircuitStateTag, DenyReason};

        let store = Store::in_memory();
        let event = BreakerEventRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            service: "llm".into(),
            action: "analyze_intent".into(),
            event_type: DenyReason::DailyLimit,
            usage: BreakerSnapshot {
                circuit: CircuitStateTag::Closed,
                daily_tokens_used: 1000,
                max_daily_tokens: 1000,
                concurrent_tasks: 1,
                max_concurrent_tasks: 3,
                tracked_tasks: 1,
                recent_denials: 1,
                open_remaining_ms: None,
            },
            task_id: None,
            resolved: false,
            resolution_note: None,
        };
        let id = event.id;
        store.append_breaker_event(event);

        let pg = store.list_breaker_events(&BreakerEventQuery {
            unresolved_only: true,
            ..Default::default()
        });
        assert_eq!(pg.total, 1);

        store.resolve_breaker_event(id, "budget raised").unwrap();
        let pg = store.list_breaker_events(&BreakerEventQuery {
            unresolved_only: true,
            ..Default::default()
        });
        assert_eq!(pg.total, 0);
    }

    #[test]
    fn file_mode_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            mode: DbMode::File,
            data_dir: dir.path().to_path_buf(),
            flush_interval_ms: 30_000,
        };

        {
            let store = Store::open(&config).unwrap();
            store.create_feedback(Feedback::new("persist me", "u1", "en"));
            store.set_setting("greeting", "hello");
            store.flush().unwrap();
        }

        let store = Store::open(&config).unwrap();
        let pg = store.list_feedback(&FeedbackQuery::default());
        assert_eq!(pg.total, 1);
        assert_eq!(pg.list[0].content, "persist me");
        assert_eq!(store.get_setting("greeting").as_deref(), Some("hello"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("database.json"), "{not json").unwrap();
        let config = StoreConfig {
            mode: DbMode::File,
            data_dir: dir.path().to_path_buf(),
            flush_interval_ms: 30_000,
        };
        let store = Store::open(&config).unwrap();
        assert_eq!(store.list_feedback(&FeedbackQuery::default()).total, 0);
    }

    #[test]
    fn terminal_task_transition_flushes_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            mode: DbMode::File,
            data_dir: dir.path().to_path_buf(),
            flush_interval_ms: 30_000,
        };
        let store = Store::open(&config).unwrap();
        let task = TaskRecord::new("fb-1");
        let task_id = task.id;
        store.create_task(task);
        store
            .finish_task(task_id, TaskStatus::Failed, Some("boom".into()))
            .unwrap();

        // The flush on terminal transition wrote the document without an
        // explicit flush() call.
        let text = std::fs::read_to_string(dir.path().join("database.json")).unwrap();
        assert!(text.contains("boom"));
    }

    #[test]
    fn breaker_sink_records_through_store() {
        use am_core::types::{BreakerSnapshot, CircuitStateTag, DenyReason};

        let store = Store::in_memory();
        let sink: &dyn BreakerSink = &store;
        sink.record_event(BreakerEventRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            service: "llm".into(),
            action: "generate_solution".into(),
            event_type: DenyReason::ConcurrencyLimit,
            usage: BreakerSnapshot {
                circuit: CircuitStateTag::Closed,
                daily_tokens_used: 0,
                max_daily_tokens: 1,
                concurrent_tasks: 3,
                max_concurrent_tasks: 3,
                tracked_tasks: 3,
                recent_denials: 1,
                open_remaining_ms: None,
            },
            task_id: Some(Uuid::new_v4()),
            resolved: false,
            resolution_note: None,
        });

        assert_eq!(
            store
                .list_breaker_events(&BreakerEventQuery::default())
                .total,
            1
        );
    }
}
