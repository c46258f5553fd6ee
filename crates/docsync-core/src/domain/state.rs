//! State - タスクの状態
//!
//! 状態は単調にしか進まない:
//! `Submitted < Pending < Running < {Succeeded, Failed}`
//!
//! Succeeded / Failed は吸収状態で、到達後はどのイベントも適用されない。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one ingestion task.
///
/// No `Ord` impl: the two terminal states share a rank and are not comparable
/// with each other. Use [`TaskState::advances_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// The backend acknowledged the upload and assigned an id.
    Submitted,

    /// Queued on the backend, not started yet.
    Pending,

    /// Being processed.
    Running,

    /// Finished successfully.
    Succeeded,

    /// Finished with an error.
    Failed,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Submitted => 0,
            TaskState::Pending => 1,
            TaskState::Running => 2,
            TaskState::Succeeded | TaskState::Failed => 3,
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Would moving from `self` to `next` be a forward transition?
    ///
    /// Equal or lower states are stale (duplicate / replayed / reordered delivery),
    /// and nothing leaves a terminal state.
    pub fn advances_to(self, next: TaskState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Map a Celery state name as reported by `GET /task_status/{id}`.
    ///
    /// Returns `None` for states this client does not know about.
    pub fn from_celery(state: &str) -> Option<TaskState> {
        match state.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(TaskState::Pending),
            "RUNNING" | "STARTED" | "PROGRESS" | "RETRY" => Some(TaskState::Running),
            "SUCCESS" => Some(TaskState::Succeeded),
            "FAILURE" | "REVOKED" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}
