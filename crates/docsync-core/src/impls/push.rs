//! PushHub / PushChannel - 共有 push 接続上のフィルタ付き購読
//!
//! 接続は 1 本（`PushConnection` が保持）、購読はタスクごと。
//! Hub は `broadcast` で全購読者にフレームを配り、各 PushChannel が
//! 自分の task_id 宛てのフレームだけを状態として拾う。
//!
//! # 取りこぼし
//! - 購読を始めた（それ以前のフレームは見えない） → `ChannelEvent::Resync`
//! - 宛先なしで状態を持つフレーム → `ChannelEvent::Resync`
//! - 再接続した → `ChannelEvent::Resync`
//! - 購読者が遅れてフレームを落とした（Lagged） → `ChannelEvent::Resync`
//! - Hub が閉じた → `ChannelEvent::Failed(ConnectionLost)`

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::domain::{ChannelEvent, PushFrame, TaskId};
use crate::error::TransportError;
use crate::ports::{EventStream, TransportChannel, TransportKind};

/// What the shared connection fans out.
#[derive(Debug, Clone)]
pub enum PushSignal {
    Frame(PushFrame),
    /// The connection dropped and came back; frames may have been missed.
    Reconnected,
}

/// Fan-out point between the single push connection and per-task subscribers.
pub struct PushHub {
    tx: Mutex<Option<broadcast::Sender<PushSignal>>>,
}

impl PushHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    fn sender(&self) -> Option<broadcast::Sender<PushSignal>> {
        match self.tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Deliver one inbound frame. Returns how many subscribers saw it.
    pub fn publish(&self, frame: PushFrame) -> usize {
        self.sender()
            .and_then(|tx| tx.send(PushSignal::Frame(frame)).ok())
            .unwrap_or(0)
    }

    pub fn announce_reconnect(&self) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(PushSignal::Reconnected);
        }
    }

    /// `None` once the hub is closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<PushSignal>> {
        self.sender().map(|tx| tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender().map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Drop the sender. Every subscriber sees the channel close.
    pub fn close(&self) {
        let taken = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if taken.is_some() {
            debug!("push hub closed");
        }
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new(64)
    }
}

pub struct PushChannel {
    hub: Arc<PushHub>,
}

impl PushChannel {
    pub fn new(hub: Arc<PushHub>) -> Self {
        Self { hub }
    }
}

async fn filter_loop(
    task_id: TaskId,
    mut rx: broadcast::Receiver<PushSignal>,
    tx: mpsc::Sender<ChannelEvent>,
) {
    // upload から購読までの間に流れたフレームは読み直すしかない
    if tx.send(ChannelEvent::Resync).await.is_err() {
        return;
    }
    loop {
        let event = match rx.recv().await {
            Ok(PushSignal::Frame(frame)) => match frame.to_event() {
                Some(event) if frame.concerns(&task_id) => ChannelEvent::Status(event),
                // 誰宛てか分からない状態は信用せず、読み直させる
                Some(_) if frame.is_unaddressed() => ChannelEvent::Resync,
                _ => continue,
            },
            Ok(PushSignal::Reconnected) => ChannelEvent::Resync,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%task_id, skipped, "push subscriber lagged");
                ChannelEvent::Resync
            }
            Err(broadcast::error::RecvError::Closed) => {
                let _ = tx
                    .send(ChannelEvent::Failed(TransportError::ConnectionLost))
                    .await;
                return;
            }
        };

        let terminal = matches!(&event, ChannelEvent::Status(s) if s.state.is_terminal());
        if tx.send(event).await.is_err() || terminal {
            return;
        }
    }
}

#[async_trait]
impl TransportChannel for PushChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    async fn open(&self, task_id: &TaskId) -> Result<EventStream, TransportError> {
        // 購読は open の時点で確定させる（spawn 後だと直後のフレームを落とす）
        let rx = self.hub.subscribe().ok_or(TransportError::ConnectionLost)?;
        let task_id = task_id.clone();
        Ok(EventStream::spawn(16, move |tx| filter_loop(task_id, rx, tx)))
    }
}
