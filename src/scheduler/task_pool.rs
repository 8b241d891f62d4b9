//! Bounded pool for agent invocations.
//!
//! Each submission acquires an optional per-stage permit and then a global
//! permit, runs the agent under the configured timeout and records the
//! outcome in a [`TaskTracker`]. The call runs on the caller's task; the pool
//! only gates admission, it does not spawn.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentError, Stage};
use crate::metrics::MetricsCollector;
use crate::tokens::{DesignToken, Task};

use super::tracker::{TaskStatus, TaskTracker};

/// Default global concurrency ceiling.
const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default per-invocation timeout.
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors surfaced by [`TaskPool::submit`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The agent failed; its error is passed through unchanged.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The agent did not finish within the pool timeout.
    #[error("Agent '{agent_type}' timed out on task '{task_id}' after {timeout:?}")]
    Timeout {
        task_id: String,
        agent_type: String,
        timeout: Duration,
    },

    /// The pool was closed while the submission waited for a permit.
    #[error("Task pool is closed")]
    Closed,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }

    /// Timeouts are retryable; agent errors defer to the agent's own view.
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::Agent(e) => e.is_retryable(),
            PoolError::Timeout { .. } => true,
            PoolError::Closed | PoolError::InvalidConfig(_) => false,
        }
    }
}

/// Configuration for the task pool.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPoolConfig {
    /// Global cap on simultaneously running invocations.
    pub max_concurrency: usize,
    /// Optional per-stage caps, applied in addition to the global cap.
    pub stage_limits: HashMap<Stage, usize>,
    /// Upper bound on a single invocation.
    pub task_timeout: Duration,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            stage_limits: HashMap::new(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl TaskPoolConfig {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Default::default()
        }
    }

    pub fn with_stage_limit(mut self, stage: Stage, limit: usize) -> Self {
        self.stage_limits.insert(stage, limit);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.max_concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if let Some((stage, _)) = self.stage_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(PoolError::InvalidConfig(format!(
                "stage limit for '{}' must be at least 1",
                stage
            )));
        }
        if self.task_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "task_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolStats {
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub stage_limits: BTreeMap<String, usize>,
}

impl PoolStats {
    pub fn total_processed(&self) -> u64 {
        self.completed + self.failed
    }
}

type TrackerKey = (String, String);

/// Decrements the running gauge when dropped, including on cancellation.
struct RunningSlot<'a> {
    pool: &'a TaskPool,
}

impl<'a> RunningSlot<'a> {
    fn enter(pool: &'a TaskPool) -> Self {
        let running = pool.running.fetch_add(1, Ordering::SeqCst) + 1;
        pool.metrics.set_running(running);
        Self { pool }
    }
}

impl Drop for RunningSlot<'_> {
    fn drop(&mut self) {
        let running = self.pool.running.fetch_sub(1, Ordering::SeqCst) - 1;
        self.pool.metrics.set_running(running);
    }
}

/// Settles one submission exactly once.
///
/// Dropping an unsettled submission, for example when the caller's future is
/// cancelled while waiting for a permit or while the agent runs, records it
/// as failed so the tracker reaches a terminal state.
struct Submission<'a> {
    pool: &'a TaskPool,
    key: TrackerKey,
    stage: Stage,
    seq: u64,
    settled: bool,
}

impl<'a> Submission<'a> {
    fn begin(pool: &'a TaskPool, task: &Task, agent_type: &str, stage: Stage) -> Self {
        let seq = pool.next_submission.fetch_add(1, Ordering::SeqCst) + 1;
        let key: TrackerKey = (task.id().to_string(), agent_type.to_string());
        let mut tracker = TaskTracker::pending(task.id(), agent_type, stage);
        tracker.submission = seq;
        pool.trackers().insert(key.clone(), tracker);
        Self {
            pool,
            key,
            stage,
            seq,
            settled: false,
        }
    }

    fn update(&self, update: impl FnOnce(&mut TaskTracker)) {
        if let Some(tracker) = self.pool.trackers().get_mut(&self.key) {
            if tracker.submission == self.seq {
                update(tracker);
            }
        }
    }

    fn started(&self) {
        self.update(TaskTracker::mark_running);
    }

    fn completed(mut self, token_count: usize, elapsed: Duration) {
        self.settled = true;
        self.pool.completed.fetch_add(1, Ordering::SeqCst);
        self.update(|t| t.mark_completed(token_count));
        self.pool
            .metrics
            .record_pool_outcome(self.stage, "completed", elapsed.as_secs_f64());
    }

    fn failed(mut self, error: String, timed_out: bool, status: &str, elapsed: Duration) {
        self.settled = true;
        self.pool.failed.fetch_add(1, Ordering::SeqCst);
        self.update(|t| t.mark_failed(error, timed_out));
        self.pool
            .metrics
            .record_pool_outcome(self.stage, status, elapsed.as_secs_f64());
    }
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.pool.failed.fetch_add(1, Ordering::SeqCst);
        self.update(|t| t.mark_failed("submission cancelled before completion", false));
        self.pool.metrics.record_pool_outcome(self.stage, "cancelled", 0.0);
        warn!(
            task_id = %self.key.0,
            agent = %self.key.1,
            stage = %self.stage,
            "Submission cancelled"
        );
    }
}

/// Bounded executor for agent invocations.
pub struct TaskPool {
    config: TaskPoolConfig,
    global: Semaphore,
    stages: HashMap<Stage, Semaphore>,
    trackers: Mutex<HashMap<TrackerKey, TaskTracker>>,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    next_submission: AtomicU64,
    metrics: MetricsCollector,
}

fn closed(submission: Submission<'_>) -> PoolError {
    submission.failed(
        "task pool is closed".to_string(),
        false,
        "failed",
        Duration::ZERO,
    );
    PoolError::Closed
}

impl TaskPool {
    /// Creates a pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a zero concurrency cap, a zero
    /// stage limit or a zero timeout.
    pub fn new(config: TaskPoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let stages = config
            .stage_limits
            .iter()
            .map(|(stage, limit)| (*stage, Semaphore::new(*limit)))
            .collect();

        info!(
            max_concurrency = config.max_concurrency,
            stage_limits = config.stage_limits.len(),
            task_timeout_ms = config.task_timeout.as_millis() as u64,
            "Task pool created"
        );

        Ok(Self {
            global: Semaphore::new(config.max_concurrency),
            stages,
            config,
            trackers: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            next_submission: AtomicU64::new(0),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &TaskPoolConfig {
        &self.config
    }

    fn trackers(&self) -> MutexGuard<'_, HashMap<TrackerKey, TaskTracker>> {
        self.trackers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `agent` on `task` once permits are available.
    ///
    /// Agent errors come back as `PoolError::Agent` carrying the original
    /// error; a timeout comes back as `PoolError::Timeout`.
    pub async fn submit(
        &self,
        agent: &dyn Agent,
        task: &Task,
        input: &[DesignToken],
    ) -> Result<Vec<DesignToken>, PoolError> {
        let stage = agent.stage();
        let agent_type = agent.agent_type().to_string();
        let submission = Submission::begin(self, task, &agent_type, stage);

        let _stage_permit = match self.stages.get(&stage) {
            Some(semaphore) => match semaphore.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => return Err(closed(submission)),
            },
            None => None,
        };
        let _global_permit = match self.global.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(closed(submission)),
        };

        submission.started();
        let _slot = RunningSlot::enter(self);
        debug!(task_id = %task.id(), agent = %agent_type, stage = %stage, "Agent started");

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.task_timeout, agent.process(task, input)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(tokens)) => {
                submission.completed(tokens.len(), elapsed);
                debug!(
                    task_id = %task.id(),
                    agent = %agent_type,
                    tokens = tokens.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "Agent completed"
                );
                Ok(tokens)
            }
            Ok(Err(e)) => {
                submission.failed(e.to_string(), false, "failed", elapsed);
                warn!(task_id = %task.id(), agent = %agent_type, error = %e, "Agent failed");
                Err(PoolError::Agent(e))
            }
            Err(_) => {
                let err = PoolError::Timeout {
                    task_id: task.id().to_string(),
                    agent_type: agent_type.clone(),
                    timeout: self.config.task_timeout,
                };
                submission.failed(err.to_string(), true, "timeout", elapsed);
                warn!(
                    task_id = %task.id(),
                    agent = %agent_type,
                    timeout_ms = self.config.task_timeout.as_millis() as u64,
                    "Agent timed out"
                );
                Err(err)
            }
        }
    }

    /// Stops admitting work. Submissions waiting on a permit fail with
    /// `PoolError::Closed`; running invocations finish normally.
    pub fn close(&self) {
        self.global.close();
        for semaphore in self.stages.values() {
            semaphore.close();
        }
        info!("Task pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.global.is_closed()
    }

    pub fn get_stats(&self) -> PoolStats {
        PoolStats {
            running: self.running.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            max_concurrency: self.config.max_concurrency,
            available_permits: self.global.available_permits(),
            stage_limits: self
                .config
                .stage_limits
                .iter()
                .map(|(stage, limit)| (stage.to_string(), *limit))
                .collect(),
        }
    }

    /// Returns the tracker for one `(task, agent)` submission.
    pub fn get_task_status(&self, task_id: &str, agent_type: &str) -> Option<TaskTracker> {
        self.trackers()
            .get(&(task_id.to_string(), agent_type.to_string()))
            .cloned()
    }

    /// Returns every tracker for `task_id`, ordered by agent type.
    pub fn task_trackers(&self, task_id: &str) -> Vec<TaskTracker> {
        let mut trackers: Vec<TaskTracker> = self
            .trackers()
            .values()
            .filter(|t| t.task_id == task_id)
            .cloned()
            .collect();
        trackers.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        trackers
    }

    /// Evicts terminal trackers and returns how many were removed.
    ///
    /// Counters are left untouched.
    pub fn clear_completed(&self) -> usize {
        let mut trackers = self.trackers();
        let before = trackers.len();
        trackers.retain(|_, t| !t.status.is_terminal());
        let removed = before - trackers.len();
        debug!(removed = removed, "Cleared terminal trackers");
        removed
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers().len()
    }

    /// Number of trackers currently in `status`.
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.trackers().values().filter(|t| t.status == status).count()
    }
}
