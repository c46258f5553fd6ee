//! TransportChannel port - タスク状態の配送経路
//!
//! Poll / Stream / Push の 3 実装が同じ契約を満たすので、
//! Tracker はどのトランスポートかを知らずに済む。
//!
//! # 契約
//! - `open()` でプロデューサを起動し、`EventStream` を返す（lazy）
//! - 終端状態か `ChannelEvent::Failed` でストリームは終わる
//! - `EventStream` を close / drop するとタイマー・接続・購読を同期的に解放する

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{ChannelEvent, TaskId};
use crate::error::TransportError;

/// Which notification mechanism a channel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Fixed-interval `GET /task_status/{id}`.
    Poll,

    /// One server-sent event stream per upload.
    Stream,

    /// Filtered subscription on the shared push connection.
    Push,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "stream" => Ok(Self::Stream),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown transport '{other}'. Expected poll, stream or push")),
        }
    }
}

/// A source of status events for one task id.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Start delivering events for `task_id`.
    ///
    /// An error here means the delivery path could not even be established.
    async fn open(&self, task_id: &TaskId) -> Result<EventStream, TransportError>;
}

/// Receiving end of one channel binding.
///
/// Owns the producer task; closing or dropping the stream aborts it, which
/// releases whatever the producer holds (interval timer, HTTP body, broadcast
/// receiver).
pub struct EventStream {
    rx: mpsc::Receiver<ChannelEvent>,
    producer: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Spawn `produce` as the producer feeding this stream.
    pub fn spawn<F, Fut>(buffer: usize, produce: F) -> Self
    where
        F: FnOnce(mpsc::Sender<ChannelEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let producer = tokio::spawn(produce(tx));
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// Wrap a receiver whose sender is driven elsewhere.
    pub fn from_receiver(rx: mpsc::Receiver<ChannelEvent>) -> Self {
        Self { rx, producer: None }
    }

    /// Next event, or `None` once the producer is done.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Stop the producer and refuse any further events.
    pub fn close(&mut self) {
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.close();
    }
}
