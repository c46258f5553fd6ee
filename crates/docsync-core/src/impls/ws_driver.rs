//! PushConnection - 共有 push 接続（WebSocket）のドライバ
//!
//! 1 本の接続を張り続け、受信した JSON フレームを `PushHub` に流す。
//!
//! # ライフサイクル
//! - 切断されたら `reconnect_delay` 待って再接続
//! - 2 回目以降の接続確立で `PushSignal::Reconnected` を配る（購読者は再同期する）
//! - shutdown を受けたら接続を閉じて Hub も閉じる

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::push::PushHub;
use crate::domain::PushFrame;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Ended {
    Dropped,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct PushConnection {
    url: String,
    reconnect_delay: Duration,
}

impl PushConnection {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run the connection until `shutdown` flips to `true` (or its sender is dropped).
    pub fn spawn(self, hub: Arc<PushHub>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(hub, shutdown))
    }

    async fn run(self, hub: Arc<PushHub>, mut shutdown: watch::Receiver<bool>) {
        let mut established_before = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                result = connect_async(self.url.as_str()) => match result {
                    Ok((socket, _)) => {
                        info!(url = %self.url, "push connection established");
                        if established_before {
                            hub.announce_reconnect();
                        }
                        established_before = true;
                        if let Ended::Shutdown = pump(socket, &hub, &mut shutdown).await {
                            break;
                        }
                        warn!(url = %self.url, "push connection dropped");
                    }
                    Err(err) => {
                        warn!(url = %self.url, error = %err, "push connection failed");
                    }
                },
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        hub.close();
        info!(url = %self.url, "push connection stopped");
    }
}

async fn pump(mut socket: Socket, hub: &PushHub, shutdown: &mut watch::Receiver<bool>) -> Ended {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = socket.close(None).await;
                return Ended::Shutdown;
            }
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<PushFrame>(&text) {
                    Ok(frame) => {
                        let delivered = hub.publish(frame);
                        debug!(delivered, "push frame");
                    }
                    Err(err) => debug!(error = %err, "ignoring non-frame push message"),
                },
                Some(Ok(Message::Close(_))) | None => return Ended::Dropped,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "push connection read failed");
                    return Ended::Dropped;
                }
            },
        }
    }
}
