//! Per-invocation bookkeeping for the task pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::Stage;

/// Lifecycle of one agent invocation inside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted, waiting for permits.
    Pending,
    /// Holding permits, agent running.
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status record for one `(task, agent)` submission.
///
/// Only the pool mutates trackers; callers receive clones. The pool keeps
/// one tracker per `(task_id, agent_type)`: a later submission of the same
/// pair replaces the entry, and an earlier submission still in flight no
/// longer updates it. Callers wanting full history for concurrent runs of
/// one task should give each run its own task id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskTracker {
    pub task_id: String,
    pub agent_type: String,
    pub stage: Stage,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of tokens returned on success.
    #[serde(default)]
    pub token_count: Option<usize>,
    /// Error text on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// True if the failure was a timeout.
    #[serde(default)]
    pub timed_out: bool,
    /// Pool-assigned sequence number of the submission that owns this entry.
    #[serde(skip)]
    pub(crate) submission: u64,
}

impl TaskTracker {
    pub(crate) fn pending(
        task_id: impl Into<String>,
        agent_type: impl Into<String>,
        stage: Stage,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_type: agent_type.into(),
            stage,
            status: TaskStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            token_count: None,
            error: None,
            timed_out: false,
            submission: 0,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn mark_completed(&mut self, token_count: usize) {
        self.status = TaskStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.token_count = Some(token_count);
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>, timed_out: bool) {
        self.status = TaskStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
        self.timed_out = timed_out;
    }

    /// Wall time between start and finish, if both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
