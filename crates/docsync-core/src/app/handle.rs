//! TaskHandle - 追跡中タスクへの呼び出し側のハンドル

use std::sync::Arc;

use super::tracker::{Applied, Binding, Resolution, TaskTracker};
use crate::domain::{Task, TaskId, TaskOutcome};
use crate::error::SyncError;
use crate::ports::TransportKind;

/// Caller-side view of one tracked task.
///
/// Stays usable after the tracker has released the binding: `snapshot` and
/// `outcome` keep returning the final record.
#[derive(Clone)]
pub struct TaskHandle {
    tracker: TaskTracker,
    task_id: TaskId,
    binding: Arc<Binding>,
}

impl TaskHandle {
    pub(crate) fn new(tracker: TaskTracker, task_id: TaskId, binding: Arc<Binding>) -> Self {
        Self {
            tracker,
            task_id,
            binding,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// `None` for uploads the backend finished synchronously.
    pub fn transport(&self) -> Option<TransportKind> {
        self.binding.transport()
    }

    pub fn snapshot(&self) -> Task {
        self.binding.task()
    }

    /// Final outcome, once there is one.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.binding.current_resolution() {
            Resolution::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Wait for the terminal outcome. Errors only if the task is cancelled.
    pub async fn wait(&self) -> Result<TaskOutcome, SyncError> {
        let mut rx = self.binding.resolution();
        let resolution = rx
            .wait_for(|r| !matches!(r, Resolution::Open))
            .await
            .map(|r| (*r).clone())
            .unwrap_or(Resolution::Cancelled);
        match resolution {
            Resolution::Done(outcome) => Ok(outcome),
            Resolution::Open | Resolution::Cancelled => {
                Err(SyncError::Cancelled(self.task_id.clone()))
            }
        }
    }

    /// Like [`TaskHandle::wait`], but a failed task is an error too.
    pub async fn wait_success(&self) -> Result<TaskOutcome, SyncError> {
        match self.wait().await? {
            TaskOutcome::Failed { task_id, detail, .. } => {
                Err(SyncError::TaskFailure { task_id, detail })
            }
            outcome => Ok(outcome),
        }
    }

    /// Ask the backend directly instead of waiting for the channel.
    pub async fn reconcile(&self) -> Result<Applied, SyncError> {
        self.tracker.reconcile_binding(&self.task_id, &self.binding).await
    }

    pub fn cancel(&self) -> bool {
        self.tracker.cancel_binding(&self.task_id, &self.binding)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("transport", &self.transport())
            .field("resolution", &self.binding.current_resolution())
            .finish()
    }
}
