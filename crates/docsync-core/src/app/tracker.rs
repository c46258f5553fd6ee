//! TaskTracker - タスクの状態機械と完了通知の唯一の窓口
//!
//! # 責務
//! - task_id ごとに Task を 1 つ保持し、トランスポートのイベントを適用する
//! - 終端に初めて到達したときだけ CompletionSink を 1 回呼ぶ
//! - 終端 / cancel でチャネルを閉じ、binding を解放する
//!
//! # 並行性
//! - binding ごとの slot ロックで「状態遷移 + 通知」を原子的にする
//! - cancel も同じロックを取るので、通知と cancel が交錯しない
//! - ロックを握ったまま await しない（sink は同期呼び出し）

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::handle::TaskHandle;
use crate::domain::{
    ChannelEvent, FailureCause, StatusEvent, Task, TaskId, TaskOutcome, TaskState, Transition,
};
use crate::error::{SyncError, TransportError};
use crate::observability::TrackerCounts;
use crate::ports::{
    Clock, CompletionSink, EventStream, StatusSource, TransportChannel, TransportKind,
};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a binding ended, as seen by waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Open,
    Done(TaskOutcome),
    Cancelled,
}

/// What happened to one observation fed to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Advanced(TaskState),
    /// Terminal state reached; the completion sink has been called.
    Completed,
    /// Stale, duplicate or unknown; nothing changed.
    Ignored,
    /// The task was already terminal.
    Absorbed,
    Cancelled,
    /// No binding for this id (never started, or already released).
    Untracked,
}

struct Slot {
    task: Task,
    cancelled: bool,
}

pub(crate) struct Binding {
    slot: Mutex<Slot>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    resolution: watch::Sender<Resolution>,
    transport: Option<TransportKind>,
}

impl Binding {
    fn new(task: Task, transport: Option<TransportKind>) -> Self {
        let (resolution, _) = watch::channel(Resolution::Open);
        Self {
            slot: Mutex::new(Slot {
                task,
                cancelled: false,
            }),
            consumer: Mutex::new(None),
            resolution,
            transport,
        }
    }

    pub(crate) fn task(&self) -> Task {
        lock(&self.slot).task.clone()
    }

    pub(crate) fn transport(&self) -> Option<TransportKind> {
        self.transport
    }

    pub(crate) fn resolution(&self) -> watch::Receiver<Resolution> {
        self.resolution.subscribe()
    }

    pub(crate) fn current_resolution(&self) -> Resolution {
        self.resolution.borrow().clone()
    }

    fn attach(&self, consumer: JoinHandle<()>) {
        let mut current = lock(&self.consumer);
        let finished = {
            let slot = lock(&self.slot);
            slot.cancelled || slot.task.is_terminal()
        };
        if finished {
            consumer.abort();
        } else {
            *current = Some(consumer);
        }
    }

    fn stop_consumer(&self) {
        if let Some(consumer) = lock(&self.consumer).take() {
            consumer.abort();
        }
    }
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
}

struct Inner {
    bindings: Mutex<HashMap<TaskId, Arc<Binding>>>,
    status_source: Option<Arc<dyn StatusSource>>,
    sink: Arc<dyn CompletionSink>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

/// Registry of in-flight tasks.
#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<Inner>,
}

impl TaskTracker {
    pub fn new(sink: Arc<dyn CompletionSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bindings: Mutex::new(HashMap::new()),
                status_source: None,
                sink,
                clock,
                counters: Counters::default(),
            }),
        }
    }

    /// Direct status reads for reconciliation.
    pub fn with_status_source(
        sink: Arc<dyn CompletionSink>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn StatusSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bindings: Mutex::new(HashMap::new()),
                status_source: Some(source),
                sink,
                clock,
                counters: Counters::default(),
            }),
        }
    }

    fn bind(
        &self,
        task_id: &TaskId,
        transport: Option<TransportKind>,
    ) -> Result<Arc<Binding>, SyncError> {
        let mut bindings = lock(&self.inner.bindings);
        if bindings.contains_key(task_id) {
            return Err(SyncError::AlreadyTracking(task_id.clone()));
        }
        let task = Task::new(task_id.clone(), self.inner.clock.now());
        let binding = Arc::new(Binding::new(task, transport));
        bindings.insert(task_id.clone(), Arc::clone(&binding));
        Ok(binding)
    }

    fn binding(&self, task_id: &TaskId) -> Option<Arc<Binding>> {
        lock(&self.inner.bindings).get(task_id).cloned()
    }

    fn unbind(&self, task_id: &TaskId, binding: &Arc<Binding>) {
        let mut bindings = lock(&self.inner.bindings);
        if bindings
            .get(task_id)
            .is_some_and(|current| Arc::ptr_eq(current, binding))
        {
            bindings.remove(task_id);
        }
    }

    fn release(&self, task_id: &TaskId, binding: &Arc<Binding>) {
        self.unbind(task_id, binding);
        binding.stop_consumer();
    }

    /// Create a task in `Submitted` and bind it to `channel`.
    ///
    /// If the channel cannot be opened the task completes as a transport
    /// failure right away; the returned handle already holds that outcome.
    pub async fn start(
        &self,
        task_id: TaskId,
        channel: Arc<dyn TransportChannel>,
    ) -> Result<TaskHandle, SyncError> {
        let kind = channel.kind();
        let binding = self.bind(&task_id, Some(kind))?;
        let handle = TaskHandle::new(self.clone(), task_id.clone(), Arc::clone(&binding));
        debug!(%task_id, transport = ?kind, "tracking task");

        match channel.open(&task_id).await {
            Ok(stream) => {
                let consumer =
                    tokio::spawn(consume(self.clone(), task_id, Arc::clone(&binding), stream));
                binding.attach(consumer);
            }
            Err(err) => {
                warn!(%task_id, transport = ?kind, error = %err, "could not open status channel");
                self.apply(&task_id, &binding, |task, now| task.fail_transport(&err, now));
            }
        }
        Ok(handle)
    }

    /// Register a task the backend finished synchronously.
    pub fn track_completed(
        &self,
        task_id: TaskId,
        detail: impl Into<String>,
    ) -> Result<TaskHandle, SyncError> {
        let binding = self.bind(&task_id, None)?;
        let handle = TaskHandle::new(self.clone(), task_id.clone(), Arc::clone(&binding));
        let event = StatusEvent::new(TaskState::Succeeded, detail);
        self.apply(&task_id, &binding, |task, now| task.apply(&event, now));
        Ok(handle)
    }

    /// Feed one status observation.
    pub fn on_event(&self, task_id: &TaskId, event: &StatusEvent) -> Applied {
        let Some(binding) = self.binding(task_id) else {
            return Applied::Untracked;
        };
        self.apply(task_id, &binding, |task, now| task.apply(event, now))
    }

    /// Record a delivery-path failure for a non-terminal task.
    pub fn on_transport_error(&self, task_id: &TaskId, err: TransportError) -> Applied {
        let Some(binding) = self.binding(task_id) else {
            return Applied::Untracked;
        };
        self.apply(task_id, &binding, |task, now| task.fail_transport(&err, now))
    }

    /// One direct status read, applied under the usual rules.
    ///
    /// A failed read leaves the task untouched and is returned as an error.
    pub async fn reconcile(&self, task_id: &TaskId) -> Result<Applied, SyncError> {
        let Some(binding) = self.binding(task_id) else {
            return Ok(Applied::Untracked);
        };
        self.reconcile_binding(task_id, &binding).await
    }

    pub(crate) async fn reconcile_binding(
        &self,
        task_id: &TaskId,
        binding: &Arc<Binding>,
    ) -> Result<Applied, SyncError> {
        {
            let slot = lock(&binding.slot);
            if slot.cancelled {
                return Ok(Applied::Cancelled);
            }
            if slot.task.is_terminal() {
                return Ok(Applied::Absorbed);
            }
        }
        let Some(source) = self.inner.status_source.as_ref() else {
            return Err(SyncError::TransportUnavailable(TransportKind::Poll));
        };

        match source.fetch_status(task_id).await {
            Ok(Some(event)) => {
                debug!(%task_id, state = %event.state, "reconciled task status");
                Ok(self.apply(task_id, binding, |task, now| task.apply(&event, now)))
            }
            Ok(None) => Ok(Applied::Ignored),
            Err(err) => {
                warn!(%task_id, error = %err, "reconciliation read failed");
                Err(err.into())
            }
        }
    }

    /// Stop tracking. No completion callback fires afterwards.
    ///
    /// Returns `false` when there was nothing left to cancel.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let Some(binding) = lock(&self.inner.bindings).remove(task_id) else {
            return false;
        };
        self.cancel_slot(task_id, &binding)
    }

    /// Cancel through a handle. A later binding under the same id is left alone.
    pub(crate) fn cancel_binding(&self, task_id: &TaskId, binding: &Arc<Binding>) -> bool {
        self.unbind(task_id, binding);
        self.cancel_slot(task_id, binding)
    }

    fn cancel_slot(&self, task_id: &TaskId, binding: &Arc<Binding>) -> bool {
        {
            let mut slot = lock(&binding.slot);
            if slot.task.is_terminal() || slot.cancelled {
                return false;
            }
            slot.cancelled = true;
            binding.resolution.send_replace(Resolution::Cancelled);
        }
        binding.stop_consumer();
        self.inner.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        info!(%task_id, "task cancelled");
        true
    }

    /// Cancel every live binding. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = lock(&self.inner.bindings).keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Current record of a live task.
    pub fn snapshot(&self, task_id: &TaskId) -> Option<Task> {
        self.binding(task_id).map(|b| b.task())
    }

    /// Every live task, oldest first.
    pub fn active(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = lock(&self.inner.bindings)
            .values()
            .map(|b| b.task())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn counts(&self) -> TrackerCounts {
        TrackerCounts {
            active: lock(&self.inner.bindings).len(),
            succeeded: self.inner.counters.succeeded.load(Ordering::Relaxed),
            failed: self.inner.counters.failed.load(Ordering::Relaxed),
            cancelled: self.inner.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    fn apply<F>(&self, task_id: &TaskId, binding: &Arc<Binding>, step: F) -> Applied
    where
        F: FnOnce(&mut Task, DateTime<Utc>) -> Transition,
    {
        let mut slot = lock(&binding.slot);
        if slot.cancelled {
            return Applied::Cancelled;
        }
        let now = self.inner.clock.now();

        match step(&mut slot.task, now) {
            Transition::Advanced(state) => {
                debug!(%task_id, %state, "task advanced");
                Applied::Advanced(state)
            }
            Transition::Stale { current, reported } => {
                trace!(%task_id, %current, %reported, "dropping stale status");
                Applied::Ignored
            }
            Transition::Absorbed => {
                trace!(%task_id, "dropping status for finished task");
                Applied::Absorbed
            }
            Transition::Completed(outcome) => {
                self.record(&outcome);
                // slot ロックを握ったまま通知（cancel と交錯させない）
                self.inner.sink.complete(outcome.clone());
                binding.resolution.send_replace(Resolution::Done(outcome));
                drop(slot);
                self.release(task_id, binding);
                Applied::Completed
            }
        }
    }

    fn record(&self, outcome: &TaskOutcome) {
        let counters = &self.inner.counters;
        match outcome {
            TaskOutcome::Succeeded { task_id, .. } => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(%task_id, "task succeeded");
            }
            TaskOutcome::Failed {
                task_id,
                detail,
                cause,
            } => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                match cause {
                    FailureCause::Task => warn!(%task_id, %detail, "task failed"),
                    FailureCause::Transport => {
                        warn!(%task_id, %detail, "task status delivery failed")
                    }
                }
            }
        }
    }
}

/// Drive one binding from its channel. Only ever touches `binding`, never a
/// later task registered under the same id.
async fn consume(
    tracker: TaskTracker,
    task_id: TaskId,
    binding: Arc<Binding>,
    mut stream: EventStream,
) {
    while let Some(event) = stream.next().await {
        let applied = match event {
            ChannelEvent::Status(status) => {
                tracker.apply(&task_id, &binding, |task, now| task.apply(&status, now))
            }
            ChannelEvent::Resync => match tracker.reconcile_binding(&task_id, &binding).await {
                Ok(applied) => applied,
                Err(_) => continue,
            },
            ChannelEvent::Failed(err) => {
                tracker.apply(&task_id, &binding, |task, now| task.fail_transport(&err, now))
            }
        };
        if matches!(applied, Applied::Completed | Applied::Absorbed | Applied::Cancelled) {
            return;
        }
    }
    // プロデューサが終端も Failed も出さずに終わった
    let err = TransportError::StreamClosed;
    tracker.apply(&task_id, &binding, |task, now| task.fail_transport(&err, now));
}
