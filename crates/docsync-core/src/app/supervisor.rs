//! Supervisor - Probe / Tracker / 共有 push 接続のライフサイクル管理
//!
//! # 責務
//! - readiness の唯一の所有者（他は watch で読むだけ）
//! - not ready の間は submit / delete / models を拒否する
//! - ready の立ち上がりで 1 回だけドキュメント一覧を再取得
//! - 成功したタスクごとに 1 回の再取得 + 成功コールバック、失敗は失敗コールバックのみ
//!
//! # ライフサイクル
//! - `start()`: probe ループ・完了ループ・push 接続を spawn（2 回目以降は何もしない）
//! - `shutdown()`: 全ループ停止 + 全タスク cancel + push Hub を閉じる（冪等）
//! - ループは `Weak` しか持たない。最後の `Supervisor` が drop されると止まる

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::handle::TaskHandle;
use super::probe::ReadinessProbe;
use super::tracker::{TaskTracker, lock};
use crate::config::SyncConfig;
use crate::domain::{ReadinessState, TaskId, TaskOutcome, Upload, UploadReceipt};
use crate::error::SyncError;
use crate::impls::{PushConnection, PushHub};
use crate::observability::TrackerCounts;
use crate::ports::{Backend, TransportChannel, TransportKind};

pub type ReadyHook = Arc<dyn Fn() + Send + Sync>;
pub type OutcomeHook = Arc<dyn Fn(&TaskOutcome) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    ready: Vec<ReadyHook>,
    succeeded: Vec<OutcomeHook>,
    failed: Vec<OutcomeHook>,
}

enum Lifecycle {
    Idle(mpsc::UnboundedReceiver<TaskOutcome>),
    Running {
        shutdown_tx: watch::Sender<bool>,
        joins: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// Everything the builder wires together.
pub(crate) struct Parts {
    pub config: SyncConfig,
    pub backend: Arc<dyn Backend>,
    pub probe: ReadinessProbe,
    pub tracker: TaskTracker,
    pub channels: HashMap<TransportKind, Arc<dyn TransportChannel>>,
    pub push: Option<(Arc<PushHub>, Option<PushConnection>)>,
    pub completions: mpsc::UnboundedReceiver<TaskOutcome>,
}

struct Inner {
    config: SyncConfig,
    backend: Arc<dyn Backend>,
    probe: ReadinessProbe,
    tracker: TaskTracker,
    channels: HashMap<TransportKind, Arc<dyn TransportChannel>>,
    push: Option<(Arc<PushHub>, Option<PushConnection>)>,
    readiness: watch::Sender<ReadinessState>,
    documents: watch::Sender<Vec<String>>,
    hooks: RwLock<Hooks>,
    lifecycle: Mutex<Lifecycle>,
}

/// Orchestrates readiness, submissions and task completion.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub(crate) fn from_parts(parts: Parts) -> Self {
        let (readiness, _) = watch::channel(ReadinessState::initial());
        let (documents, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                config: parts.config,
                backend: parts.backend,
                probe: parts.probe,
                tracker: parts.tracker,
                channels: parts.channels,
                push: parts.push,
                readiness,
                documents,
                hooks: RwLock::new(Hooks::default()),
                lifecycle: Mutex::new(Lifecycle::Idle(parts.completions)),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub fn counts(&self) -> TrackerCounts {
        self.inner.tracker.counts()
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Called on every not-ready → ready transition, after the document refresh.
    pub fn on_ready<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks_mut().ready.push(Arc::new(hook));
    }

    /// Called once per succeeded task, after the document refresh.
    pub fn on_task_succeeded<F>(&self, hook: F)
    where
        F: Fn(&TaskOutcome) + Send + Sync + 'static,
    {
        self.hooks_mut().succeeded.push(Arc::new(hook));
    }

    /// Called once per failed task (backend failure or delivery failure).
    pub fn on_task_failed<F>(&self, hook: F)
    where
        F: Fn(&TaskOutcome) + Send + Sync + 'static,
    {
        self.hooks_mut().failed.push(Arc::new(hook));
    }

    fn hooks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Hooks> {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn hooks(&self) -> std::sync::RwLockReadGuard<'_, Hooks> {
        self.inner
            .hooks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the probe loop, the completion loop and the push connection.
    ///
    /// Must be called inside a tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        let completions = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle(completions) => completions,
            other => {
                *lifecycle = other;
                return;
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(3);

        joins.push(tokio::spawn(probe_loop(
            Arc::downgrade(&self.inner),
            self.inner.config.probe_interval(),
            shutdown_rx.clone(),
        )));
        joins.push(tokio::spawn(completion_loop(
            Arc::downgrade(&self.inner),
            completions,
            shutdown_rx.clone(),
        )));
        if let Some((hub, Some(connection))) = &self.inner.push {
            joins.push(connection.clone().spawn(Arc::clone(hub), shutdown_rx));
        }

        info!(
            backend = %self.inner.config.backend_url,
            queued_transport = ?self.inner.config.queued_transport,
            "supervisor started"
        );
        *lifecycle = Lifecycle::Running { shutdown_tx, joins };
    }

    /// Stop every loop, cancel every active task and close the push hub.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *lock(&self.inner.lifecycle), Lifecycle::Stopped);
        let joins = match previous {
            Lifecycle::Running { shutdown_tx, joins } => {
                // ignore send error: receivers may already be dropped
                let _ = shutdown_tx.send(true);
                joins
            }
            Lifecycle::Idle(_) => Vec::new(),
            Lifecycle::Stopped => return,
        };

        let cancelled = self.inner.tracker.cancel_all();
        for join in joins {
            let _ = join.await;
        }
        if let Some((hub, _)) = &self.inner.push {
            hub.close();
        }
        info!(cancelled, "supervisor stopped");
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    pub fn readiness(&self) -> ReadinessState {
        self.inner.readiness.borrow().clone()
    }

    pub fn subscribe_readiness(&self) -> watch::Receiver<ReadinessState> {
        self.inner.readiness.subscribe()
    }

    /// Run one probe and publish the result.
    ///
    /// On a not-ready → ready edge: one document refresh, then the ready hooks.
    pub async fn probe_now(&self) -> ReadinessState {
        let state = self.inner.probe.probe().await;
        let previous = self.inner.readiness.send_replace(state.clone());

        match (previous.ready, state.ready) {
            (false, true) => {
                info!(ready = true, "backend is ready");
                let _ = self.refresh_documents().await;
                let hooks = self.hooks().ready.clone();
                for hook in hooks {
                    hook();
                }
            }
            (true, false) => {
                warn!(ready = false, reason = ?state.last_error, "backend is no longer ready");
            }
            _ => {}
        }
        state
    }

    fn ensure_ready(&self) -> Result<(), SyncError> {
        let readiness = self.inner.readiness.borrow();
        if readiness.ready {
            Ok(())
        } else {
            Err(SyncError::NotReady {
                reason: readiness.last_error.clone(),
            })
        }
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Last fetched document list.
    pub fn documents(&self) -> Vec<String> {
        self.inner.documents.borrow().clone()
    }

    pub fn subscribe_documents(&self) -> watch::Receiver<Vec<String>> {
        self.inner.documents.subscribe()
    }

    /// Re-fetch the document list. On failure the previous list is kept.
    pub async fn refresh_documents(&self) -> Result<Vec<String>, SyncError> {
        match self.inner.backend.documents().await {
            Ok(documents) => {
                debug!(count = documents.len(), "document list refreshed");
                self.inner.documents.send_replace(documents.clone());
                Ok(documents)
            }
            Err(err) => {
                warn!(error = %err, "document list refresh failed");
                Err(err.into())
            }
        }
    }

    pub async fn delete_document(&self, name: &str) -> Result<(), SyncError> {
        self.ensure_ready()?;
        self.inner.backend.delete_document(name).await?;
        info!(document = name, "document deleted");
        let _ = self.refresh_documents().await;
        Ok(())
    }

    pub async fn models(&self) -> Result<Vec<String>, SyncError> {
        self.ensure_ready()?;
        Ok(self.inner.backend.models().await?)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    fn channel(&self, kind: TransportKind) -> Result<Arc<dyn TransportChannel>, SyncError> {
        self.inner
            .channels
            .get(&kind)
            .cloned()
            .ok_or(SyncError::TransportUnavailable(kind))
    }

    /// Upload a file and start tracking the resulting task.
    ///
    /// The response shape picks the transport: `{message}` needs none,
    /// `{filename}` uses the status stream, `{task_id}` uses the configured
    /// queued transport.
    pub async fn submit(&self, upload: Upload) -> Result<TaskHandle, SyncError> {
        self.ensure_ready()?;
        let file_name = upload.file_name.clone();
        let receipt = self.inner.backend.upload(upload).await?;
        debug!(file = %file_name, receipt = ?receipt, "upload accepted");

        match receipt {
            UploadReceipt::Completed { message } => {
                self.inner.tracker.track_completed(TaskId::local(), message)
            }
            UploadReceipt::Streamed { filename } => {
                let channel = self.channel(TransportKind::Stream)?;
                self.inner.tracker.start(filename, channel).await
            }
            UploadReceipt::Queued { task_id } => {
                let channel = self.channel(self.inner.config.queued_transport)?;
                self.inner.tracker.start(task_id, channel).await
            }
        }
    }

    /// Read a file from disk and [`Supervisor::submit`] it.
    pub async fn submit_path(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<TaskHandle, SyncError> {
        self.ensure_ready()?;
        let path = path.as_ref();
        let upload = Upload::from_path(path)
            .await
            .map_err(|source| SyncError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.submit(upload).await
    }

    async fn finish(&self, outcome: TaskOutcome) {
        if outcome.is_success() {
            let _ = self.refresh_documents().await;
            let hooks = self.hooks().succeeded.clone();
            for hook in hooks {
                hook(&outcome);
            }
        } else {
            let hooks = self.hooks().failed.clone();
            for hook in hooks {
                hook(&outcome);
            }
        }
    }
}

fn upgrade(inner: &Weak<Inner>) -> Option<Supervisor> {
    inner.upgrade().map(|inner| Supervisor { inner })
}

async fn probe_loop(inner: Weak<Inner>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => match changed {
                Ok(()) => continue,
                Err(_) => break,
            },
            _ = ticker.tick() => {}
        }
        let Some(supervisor) = upgrade(&inner) else {
            break;
        };
        tokio::select! {
            changed = shutdown.changed() => match changed {
                Ok(()) => continue,
                Err(_) => break,
            },
            _ = supervisor.probe_now() => {}
        }
    }
    debug!("probe loop stopped");
}

async fn completion_loop(
    inner: Weak<Inner>,
    mut completions: mpsc::UnboundedReceiver<TaskOutcome>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let outcome = tokio::select! {
            changed = shutdown.changed() => match changed {
                Ok(()) => continue,
                Err(_) => return,
            },
            outcome = completions.recv() => outcome,
        };
        let Some(outcome) = outcome else {
            return;
        };
        let Some(supervisor) = upgrade(&inner) else {
            return;
        };
        supervisor.finish(outcome).await;
    }

    // shutdown より前に終わったタスクの通知は落とさない
    let Some(supervisor) = upgrade(&inner) else {
        return;
    };
    while let Ok(outcome) = completions.try_recv() {
        supervisor.finish(outcome).await;
    }
}
