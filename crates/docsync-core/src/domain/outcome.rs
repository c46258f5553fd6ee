//! Outcome model: what a finished task reports to the completion callbacks.
//!
//! A task ends exactly once, either because the backend said so or because the
//! only delivery path for its status broke. Callers need to tell those apart, so
//! a failure carries its [`FailureCause`].

use serde::{Deserialize, Serialize};

use super::TaskId;

/// Why a task ended in failure.
///
/// Serialized as SCREAMING_SNAKE_CASE: TASK / TRANSPORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// The backend reported the task as failed.
    Task,

    /// Status delivery failed (endpoint unreachable, stream closed, connection lost).
    Transport,
}

/// Terminal result of one tracked task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded {
        task_id: TaskId,
        detail: String,
    },
    Failed {
        task_id: TaskId,
        detail: String,
        cause: FailureCause,
    },
}

impl TaskOutcome {
    pub fn succeeded(task_id: TaskId, detail: impl Into<String>) -> Self {
        Self::Succeeded {
            task_id,
            detail: detail.into(),
        }
    }

    pub fn failed(task_id: TaskId, detail: impl Into<String>, cause: FailureCause) -> Self {
        Self::Failed {
            task_id,
            detail: detail.into(),
            cause,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::Succeeded { task_id, .. } | Self::Failed { task_id, .. } => task_id,
        }
    }

    /// Human-readable detail (backend message or transport error text).
    pub fn detail(&self) -> &str {
        match self {
            Self::Succeeded { detail, .. } | Self::Failed { detail, .. } => detail,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// `Some(cause)` for failures, `None` for successes.
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { cause, .. } => Some(*cause),
        }
    }
}
