//! CompletionSink port - タスク終了の通知先

use crate::domain::TaskOutcome;

/// Receives each task's terminal outcome, exactly once per task.
///
/// The tracker calls `complete` while it still holds the task's lock, so that a
/// concurrent cancel cannot slip in between the state change and the callback.
/// Implementations must return quickly and must not call back into the tracker.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, outcome: TaskOutcome);
}

impl<F> CompletionSink for F
where
    F: Fn(TaskOutcome) + Send + Sync,
{
    fn complete(&self, outcome: TaskOutcome) {
        self(outcome)
    }
}
