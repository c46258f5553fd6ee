//! StreamChannel - アップロードごとの SSE ストリームを読むトランスポート
//!
//! 1 メッセージ = 1 イベント。`completed` で終了。
//! 終端イベントより前にストリームが閉じた・エラーになった場合は
//! 失敗とは推定せず、`TransportError` として報告する。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{ChannelEvent, StatusEvent, TaskId};
use crate::error::TransportError;
use crate::ports::{Backend, EventStream, StatusStream, TransportChannel, TransportKind};

pub struct StreamChannel {
    backend: Arc<dyn Backend>,
}

impl StreamChannel {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

async fn relay(task_id: TaskId, mut stream: StatusStream, tx: mpsc::Sender<ChannelEvent>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(payload) => {
                let event = StatusEvent::from_stream_payload(&payload);
                let terminal = event.state.is_terminal();
                debug!(%task_id, state = %event.state, "stream status");
                if tx.send(ChannelEvent::Status(event)).await.is_err() || terminal {
                    return;
                }
            }
            Err(err) => {
                warn!(%task_id, error = %err, "status stream failed");
                let _ = tx.send(ChannelEvent::Failed(err.into())).await;
                return;
            }
        }
    }
    warn!(%task_id, "status stream ended before completion");
    let _ = tx.send(ChannelEvent::Failed(TransportError::StreamClosed)).await;
}

#[async_trait]
impl TransportChannel for StreamChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn open(&self, task_id: &TaskId) -> Result<EventStream, TransportError> {
        let stream = self.backend.open_status_stream(task_id).await?;
        let task_id = task_id.clone();
        Ok(EventStream::spawn(16, move |tx| relay(task_id, stream, tx)))
    }
}
