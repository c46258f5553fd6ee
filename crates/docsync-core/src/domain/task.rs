//! Task record: the state machine for one in-flight ingestion job.
//!
//! Design:
//! - This is the single source of truth for a task's state on the client.
//! - All transitions go through [`Task::apply`] / [`Task::fail_transport`].
//! - `terminal_notified` flips exactly once; the caller fires the completion
//!   callback only when a transition returns [`Transition::Completed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FailureCause, StatusEvent, TaskId, TaskOutcome, TaskState};
use crate::error::TransportError;

/// Result of feeding one observation into a [`Task`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Moved forward to a non-terminal state.
    Advanced(TaskState),

    /// First arrival in a terminal state. The outcome must be delivered once.
    Completed(TaskOutcome),

    /// Equal to or behind the current state; discarded.
    Stale { current: TaskState, reported: TaskState },

    /// Already terminal; discarded.
    Absorbed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,

    /// Last status text that came with an applied event (last value wins).
    pub detail: Option<String>,

    /// Set once the completion callback has been handed its outcome.
    pub terminal_notified: bool,

    /// Set when the failure came from the delivery path rather than the backend.
    pub failure_cause: Option<FailureCause>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: TaskState::Submitted,
            detail: None,
            terminal_notified: false,
            failure_cause: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a status event under the monotonicity rule.
    pub fn apply(&mut self, event: &StatusEvent, now: DateTime<Utc>) -> Transition {
        if self.state.is_terminal() {
            return Transition::Absorbed;
        }
        if !self.state.advances_to(event.state) {
            return Transition::Stale {
                current: self.state,
                reported: event.state,
            };
        }

        self.state = event.state;
        if let Some(detail) = &event.detail {
            self.detail = Some(detail.clone());
        }
        if event.state == TaskState::Failed {
            self.failure_cause = Some(FailureCause::Task);
        }
        self.updated_at = now;

        if event.state.is_terminal() {
            self.complete()
        } else {
            Transition::Advanced(event.state)
        }
    }

    /// Record a delivery-path failure as a `Failed`-equivalent completion.
    ///
    /// Ignored once the task is terminal.
    pub fn fail_transport(&mut self, error: &TransportError, now: DateTime<Utc>) -> Transition {
        if self.state.is_terminal() {
            return Transition::Absorbed;
        }
        self.state = TaskState::Failed;
        self.detail = Some(error.to_string());
        self.failure_cause = Some(FailureCause::Transport);
        self.updated_at = now;
        self.complete()
    }

    fn complete(&mut self) -> Transition {
        if self.terminal_notified {
            return Transition::Absorbed;
        }
        self.terminal_notified = true;

        let outcome = match self.state {
            TaskState::Succeeded => TaskOutcome::succeeded(
                self.id.clone(),
                self.detail.clone().unwrap_or_else(|| "completed".to_string()),
            ),
            _ => TaskOutcome::failed(
                self.id.clone(),
                self.detail.clone().unwrap_or_else(|| "failed".to_string()),
                self.failure_cause.unwrap_or(FailureCause::Task),
            ),
        };
        Transition::Completed(outcome)
    }
}
