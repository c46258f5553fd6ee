//! PollChannel - 固定間隔で `GET /task_status/{id}` を叩くトランスポート
//!
//! # 配送保証
//! - 結果整合（遅延は最大で interval 分）
//! - push の取りこぼしに強い
//!
//! # 失敗の扱い
//! - 連続失敗が `failure_budget` に達したら `ChannelEvent::Failed` を 1 回出して停止
//! - budget=1（デフォルト）なら最初の失敗で停止
//! - 「タスクが失敗した」と「ステータス取得ができない」は別物として区別する

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::domain::{ChannelEvent, StatusEvent, TaskId};
use crate::error::TransportError;
use crate::ports::{Backend, EventStream, StatusSource, TransportChannel, TransportKind};

pub struct PollChannel {
    backend: Arc<dyn Backend>,
    interval: Duration,
    failure_budget: u32,
}

impl PollChannel {
    pub fn new(backend: Arc<dyn Backend>, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            failure_budget: 1,
        }
    }

    /// Number of consecutive failed polls tolerated before giving up.
    pub fn with_failure_budget(mut self, budget: u32) -> Self {
        self.failure_budget = budget.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

async fn fetch(backend: &dyn Backend, task_id: &TaskId) -> Result<Option<StatusEvent>, TransportError> {
    let report = backend.task_status(task_id).await?;
    let event = report.to_event();
    if event.is_none() {
        warn!(%task_id, state = %report.state, "ignoring unknown task state");
    }
    Ok(event)
}

async fn poll_loop(
    backend: Arc<dyn Backend>,
    task_id: TaskId,
    interval: Duration,
    failure_budget: u32,
    tx: mpsc::Sender<ChannelEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        ticker.tick().await;

        match fetch(backend.as_ref(), &task_id).await {
            Ok(Some(event)) => {
                failures = 0;
                let terminal = event.state.is_terminal();
                debug!(%task_id, state = %event.state, "polled task status");
                if tx.send(ChannelEvent::Status(event)).await.is_err() || terminal {
                    return;
                }
            }
            Ok(None) => failures = 0,
            Err(err) => {
                failures += 1;
                if failures >= failure_budget {
                    warn!(%task_id, error = %err, failures, "giving up on status polling");
                    let _ = tx.send(ChannelEvent::Failed(err)).await;
                    return;
                }
                warn!(%task_id, error = %err, failures, "status poll failed, retrying");
            }
        }
    }
}

#[async_trait]
impl TransportChannel for PollChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn open(&self, task_id: &TaskId) -> Result<EventStream, TransportError> {
        let backend = Arc::clone(&self.backend);
        let task_id = task_id.clone();
        let interval = self.interval;
        let budget = self.failure_budget;
        Ok(EventStream::spawn(8, move |tx| {
            poll_loop(backend, task_id, interval, budget, tx)
        }))
    }
}

#[async_trait]
impl StatusSource for PollChannel {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<Option<StatusEvent>, TransportError> {
        fetch(self.backend.as_ref(), task_id).await
    }
}
