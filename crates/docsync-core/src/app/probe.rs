//! ReadinessProbe - `GET /status` を 1 回叩いて ReadinessState にする
//!
//! 失敗はエラーにせず「not ready + 理由」として返す。
//! 周期実行と立ち上がりエッジ検出は Supervisor 側。

use std::sync::Arc;

use tracing::debug;

use crate::domain::ReadinessState;
use crate::ports::{Backend, Clock};

pub struct ReadinessProbe {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
}

impl ReadinessProbe {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub async fn probe(&self) -> ReadinessState {
        let state = match self.backend.status().await {
            Ok(status) => ReadinessState::observed(&status, self.clock.now()),
            Err(err) => ReadinessState::unreachable(err.to_string(), self.clock.now()),
        };
        debug!(ready = state.ready, error = ?state.last_error, "readiness probe");
        state
    }
}
