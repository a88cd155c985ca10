//! Multi-dimensional token circuit breaker.
//!
//! One instance guards every external model call. Admission is tested in a
//! fixed order -- circuit, daily budget, concurrency cap, per-task budget --
//! and an allowed call *pre-reserves* its estimated tokens so concurrent
//! callers cannot jointly overshoot a limit between check and use. The
//! reservation is reconciled against actual usage on release.
//!
//! The circuit itself follows the classic closed → open → half-open cycle:
//! enough denials inside the rolling trip window open it, a probe is admitted
//! after the half-open interval, and a successful release of that probe
//! closes it again.
//!
//! All time arithmetic uses [`tokio::time::Instant`] so tests can drive the
//! clock with `start_paused`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use am_core::config::BreakerLimits;
use am_core::types::{BreakerEventRecord, BreakerSnapshot, CircuitStateTag, DenyReason};

/// Task entries older than this are dropped by housekeeping. Guards against
/// orchestrators that died without retiring their task.
const TASK_TTL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Token budget per rolling window.
    pub max_daily_tokens: u64,
    /// Token budget for a single task across all its calls.
    pub max_task_tokens: u64,
    /// Maximum tasks tracked as in-flight at once.
    pub max_concurrent_tasks: usize,
    /// Retry budget per task.
    pub max_retries: u32,
    /// Length of the rolling daily window.
    pub token_window: Duration,
    /// How long the circuit stays open before admitting a probe.
    pub half_open_interval: Duration,
    /// Denials inside `trip_window` needed to open the circuit.
    pub trip_failure_threshold: usize,
    /// Rolling window over which denials are counted.
    pub trip_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_daily_tokens: 1_000_000,
            max_task_tokens: 80_000,
            max_concurrent_tasks: 3,
            max_retries: 3,
            token_window: Duration::from_secs(86_400),
            half_open_interval: Duration::from_secs(600),
            trip_failure_threshold: 5,
            trip_window: Duration::from_secs(60),
        }
    }
}

impl From<&BreakerLimits> for BreakerConfig {
    fn from(limits: &BreakerLimits) -> Self {
        Self {
            max_daily_tokens: limits.max_daily_tokens,
            max_task_tokens: limits.max_task_tokens,
            max_concurrent_tasks: limits.max_concurrent_tasks,
            max_retries: limits.max_retries,
            token_window: Duration::from_millis(limits.token_window_ms),
            half_open_interval: Duration::from_millis(limits.half_open_interval_ms),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Event sink
// ---------------------------------------------------------------------------

/// Receives one record per non-allowed admission decision. The store
/// implements this; the breaker itself never talks to persistence directly.
pub trait BreakerSink: Send + Sync {
    fn record_event(&self, event: BreakerEventRecord);
}

/// Sink that discards every event. Used by tests and the diagnostic CLI.
pub struct NullSink;

impl BreakerSink for NullSink {
    fn record_event(&self, _event: BreakerEventRecord) {}
}

// ---------------------------------------------------------------------------
// Inner state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Circuit {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct TaskEntry {
    /// Cumulative tokens attributed to the task (reserved, then reconciled).
    tokens_used: u64,
    /// Outstanding reservation from checks not yet released.
    reserved: u64,
    retry_count: u32,
    created_at: Instant,
}

impl TaskEntry {
    fn new(now: Instant) -> Self {
        Self {
            tokens_used: 0,
            reserved: 0,
            retry_count: 0,
            created_at: now,
        }
    }
}

struct Inner {
    circuit: Circuit,
    daily_tokens_used: u64,
    window_started: Instant,
    tasks: HashMap<Uuid, TaskEntry>,
    denials: VecDeque<Instant>,
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Outcome of a [`TokenBreaker::check`] call.
#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub snapshot: BreakerSnapshot,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

// ---------------------------------------------------------------------------
// TokenBreaker
// ---------------------------------------------------------------------------

/// The single admission-control authority. Cheap to clone; all clones share
/// state and every state transition runs under one lock, so `check` and
/// `release` appear atomic to callers.
#[derive(Clone)]
pub struct TokenBreaker {
    config: Arc<BreakerConfig>,
    inner: Arc<Mutex<Inner>>,
    sink: Arc<dyn BreakerSink>,
}

impl TokenBreaker {
    pub fn new(config: BreakerConfig, sink: Arc<dyn BreakerSink>) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                circuit: Circuit::Closed,
                daily_tokens_used: 0,
                window_started: Instant::now(),
                tasks: HashMap::new(),
                denials: VecDeque::new(),
            })),
            sink,
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Test admission for a call that expects to consume `estimated_tokens`.
    ///
    /// On allow, the estimate is pre-reserved against the daily and per-task
    /// budgets and, for a previously unseen task, a concurrency slot is
    /// claimed. On deny, a breaker event is recorded through the sink and the
    /// denial counts toward the trip window.
    pub async fn check(
        &self,
        service: &str,
        action: &str,
        estimated_tokens: u64,
        task_id: Option<Uuid>,
    ) -> Admission {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        // (i) circuit
        match inner.circuit {
            Circuit::Open { until } if now < until => {
                return self.deny(inner, now, DenyReason::CircuitOpen, service, action, task_id);
            }
            Circuit::Open { .. } => {
                info!("circuit transitioning open -> half-open");
                inner.circuit = Circuit::HalfOpen;
            }
            _ => {}
        }

        // (ii) daily budget
        if inner.daily_tokens_used + estimated_tokens > self.config.max_daily_tokens {
            return self.deny(inner, now, DenyReason::DailyLimit, service, action, task_id);
        }

        // (iii) concurrency cap (only a new task claims a slot)
        let is_new_task = task_id.map(|id| !inner.tasks.contains_key(&id)).unwrap_or(false);
        if is_new_task && inner.tasks.len() >= self.config.max_concurrent_tasks {
            return self.deny(
                inner,
                now,
                DenyReason::ConcurrencyLimit,
                service,
                action,
                task_id,
            );
        }

        // (iv) per-task budget
        if let Some(id) = task_id {
            if let Some(entry) = inner.tasks.get(&id) {
                if entry.tokens_used + estimated_tokens > self.config.max_task_tokens {
                    return self.deny(inner, now, DenyReason::TaskLimit, service, action, task_id);
                }
            }
        }

        // Pre-reserve.
        inner.daily_tokens_used += estimated_tokens;
        if let Some(id) = task_id {
            let entry = inner.tasks.entry(id).or_insert_with(|| TaskEntry::new(now));
            entry.tokens_used += estimated_tokens;
            entry.reserved += estimated_tokens;
        }

        debug!(
            service,
            action,
            estimated_tokens,
            daily = inner.daily_tokens_used,
            "admission allowed"
        );
        Admission {
            allowed: true,
            reason: None,
            snapshot: self.snapshot_of(&inner, now),
        }
    }

    /// Reconcile the outstanding reservation for `task_id` against the
    /// tokens actually consumed. A successful release while the circuit is
    /// half-open closes it; the task entry itself stays until
    /// [`finish_task`](Self::finish_task).
    pub async fn release(&self, task_id: Uuid, actual_tokens: u64, success: bool) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(entry) = inner.tasks.get_mut(&task_id) {
            let reserved = entry.reserved;
            entry.reserved = 0;
            entry.tokens_used = entry.tokens_used.saturating_sub(reserved) + actual_tokens;
            inner.daily_tokens_used =
                inner.daily_tokens_used.saturating_sub(reserved) + actual_tokens;
        }

        if success {
            if let Circuit::HalfOpen = inner.circuit {
                info!("circuit transitioning half-open -> closed");
                inner.circuit = Circuit::Closed;
                inner.denials.clear();
            }
        }
    }

    /// Retire a task: drop its entry, return any outstanding reservation to
    /// the daily pool, and free the concurrency slot. Runs on every
    /// orchestrator exit path.
    pub async fn finish_task(&self, task_id: Uuid) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(entry) = inner.tasks.remove(&task_id) {
            inner.daily_tokens_used = inner.daily_tokens_used.saturating_sub(entry.reserved);
            debug!(task_id = %task_id, tokens = entry.tokens_used, "task retired");
        }
    }

    /// Bump the retry counter for a task. Returns `false` -- and records a
    /// `max-retries` event -- once the count exceeds the configured budget.
    pub async fn increment_retry(&self, task_id: Uuid) -> bool {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();
        let entry = inner
            .tasks
            .entry(task_id)
            .or_insert_with(|| TaskEntry::new(now));
        entry.retry_count += 1;
        let count = entry.retry_count;

        if count > self.config.max_retries {
            warn!(task_id = %task_id, count, "retry budget exhausted");
            let snapshot = self.snapshot_of(inner, now);
            drop(guard);
            self.sink.record_event(BreakerEventRecord {
                id: Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                service: "orchestrator".into(),
                action: "retry".into(),
                event_type: DenyReason::MaxRetries,
                usage: snapshot,
                task_id: Some(task_id),
                resolved: false,
                resolution_note: None,
            });
            false
        } else {
            true
        }
    }

    pub async fn retry_count(&self, task_id: Uuid) -> u32 {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .get(&task_id)
            .map(|e| e.retry_count)
            .unwrap_or(0)
    }

    /// Point-in-time view of breaker state.
    pub async fn status(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().await;
        self.snapshot_of(&inner, Instant::now())
    }

    /// One pass of periodic maintenance: roll the daily window, expire stale
    /// task entries, trim the denial ring. Call at ≥ 1 Hz.
    pub async fn housekeeping_tick(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let now = Instant::now();

        if now.duration_since(inner.window_started) >= self.config.token_window {
            info!(
                spent = inner.daily_tokens_used,
                "daily token window rolled over"
            );
            inner.daily_tokens_used = 0;
            inner.window_started = now;
        }

        let stale: Vec<Uuid> = inner
            .tasks
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) >= TASK_TTL)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(entry) = inner.tasks.remove(&id) {
                inner.daily_tokens_used = inner.daily_tokens_used.saturating_sub(entry.reserved);
                warn!(task_id = %id, "expired stale task entry");
            }
        }

        let cutoff = self.config.trip_window;
        while inner
            .denials
            .front()
            .is_some_and(|t| now.duration_since(*t) >= cutoff)
        {
            inner.denials.pop_front();
        }
    }

    /// Spawn the housekeeping loop on the runtime. The loop exits when the
    /// returned handle is aborted or the runtime shuts down.
    pub fn spawn_housekeeping(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let breaker = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                breaker.housekeeping_tick().await;
            }
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn deny(
        &self,
        inner: &mut Inner,
        now: Instant,
        reason: DenyReason,
        service: &str,
        action: &str,
        task_id: Option<Uuid>,
    ) -> Admission {
        inner.denials.push_back(now);
        let cutoff = self.config.trip_window;
        while inner
            .denials
            .front()
            .is_some_and(|t| now.duration_since(*t) >= cutoff)
        {
            inner.denials.pop_front();
        }

        match inner.circuit {
            Circuit::Closed => {
                if inner.denials.len() >= self.config.trip_failure_threshold {
                    warn!(
                        denials = inner.denials.len(),
                        "circuit tripping closed -> open"
                    );
                    inner.circuit = Circuit::Open {
                        until: now + self.config.half_open_interval,
                    };
                }
            }
            Circuit::HalfOpen => {
                warn!("probe denied, circuit re-opening");
                inner.circuit = Circuit::Open {
                    until: now + self.config.half_open_interval,
                };
            }
            Circuit::Open { .. } => {}
        }

        let snapshot = self.snapshot_of(inner, now);
        warn!(service, action, %reason, "admission denied");
        self.sink.record_event(BreakerEventRecord {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            service: service.to_string(),
            action: action.to_string(),
            event_type: reason,
            usage: snapshot.clone(),
            task_id,
            resolved: false,
            resolution_note: None,
        });

        Admission {
            allowed: false,
            reason: Some(reason),
            snapshot,
        }
    }

    fn snapshot_of(&self, inner: &Inner, now: Instant) -> BreakerSnapshot {
        let (circuit, open_remaining_ms) = match inner.circuit {
            Circuit::Closed => (CircuitStateTag::Closed, None),
            Circuit::HalfOpen => (CircuitStateTag::HalfOpen, None),
            Circuit::Open { until } => (
                CircuitStateTag::Open,
                Some(until.saturating_duration_since(now).as_millis() as u64),
            ),
        };
        BreakerSnapshot {
            circuit,
            daily_tokens_used: inner.daily_tokens_used,
            max_daily_tokens: self.config.max_daily_tokens,
            concurrent_tasks: inner.tasks.len(),
            max_concurrent_tasks: self.config.max_concurrent_tasks,
            tracked_tasks: inner.tasks.len(),
            recent_denials: inner.denials.len(),
            open_remaining_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
