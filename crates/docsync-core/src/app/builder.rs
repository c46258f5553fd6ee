//! SupervisorBuilder - Supervisor の構築とワイヤリング
//!
//! # 起動時検証（Fail-fast）
//! - 設定値の検証（interval 0、budget 0、queued_transport = stream など）
//! - backend URL が解釈できること
//! - queued_transport に対応するチャネルが用意できること（push なら push_url か Hub）
//!
//! 実行中に「設定されていないトランスポート」で詰まらないよう、build() で落とす。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::probe::ReadinessProbe;
use super::supervisor::{Parts, Supervisor};
use super::tracker::TaskTracker;
use crate::config::SyncConfig;
use crate::domain::TaskOutcome;
use crate::error::{BackendError, SyncError};
use crate::impls::{HttpBackend, PollChannel, PushChannel, PushConnection, PushHub, StreamChannel};
use crate::ports::{Backend, Clock, SystemClock, TransportChannel, TransportKind};

/// Capacity of the push fan-out before slow subscribers start to lag.
const PUSH_HUB_CAPACITY: usize = 256;

/// BuildError は Supervisor 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidConfig(#[from] SyncError),

    #[error("Invalid backend: {0}")]
    Backend(#[from] BackendError),

    #[error("Queued transport {0:?} is selected but not configured.")]
    TransportNotConfigured(TransportKind),
}

/// # 使用例
/// ```ignore
/// let supervisor = SupervisorBuilder::new(SyncConfig::from_env()?)
///     .build()?;
/// supervisor.start();
/// ```
pub struct SupervisorBuilder {
    config: SyncConfig,
    backend: Option<Arc<dyn Backend>>,
    clock: Option<Arc<dyn Clock>>,
    push_hub: Option<Arc<PushHub>>,
    channels: Vec<Arc<dyn TransportChannel>>,
}

impl SupervisorBuilder {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            backend: None,
            clock: None,
            push_hub: None,
            channels: Vec::new(),
        }
    }

    /// Use this backend instead of an `HttpBackend` on `config.backend_url`.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable push tracking on a hub fed by the caller.
    ///
    /// With `push_url` set the supervisor also drives the connection itself.
    pub fn push_hub(mut self, hub: Arc<PushHub>) -> Self {
        self.push_hub = Some(hub);
        self
    }

    /// Replace the built-in channel of the same kind.
    pub fn channel(mut self, channel: Arc<dyn TransportChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn build(self) -> Result<Supervisor, BuildError> {
        let config = self.config;
        config.validate()?;

        let backend: Arc<dyn Backend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::new(
                &config.backend_url,
                config.request_timeout(),
            )?),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let poll = Arc::new(
            PollChannel::new(Arc::clone(&backend), config.poll_interval())
                .with_failure_budget(config.poll_failure_budget),
        );

        let push = match (self.push_hub, config.push_url.as_deref()) {
            (Some(hub), url) => Some((hub, url.map(|u| connection(&config, u)))),
            (None, Some(url)) => Some((
                Arc::new(PushHub::new(PUSH_HUB_CAPACITY)),
                Some(connection(&config, url)),
            )),
            (None, None) => None,
        };

        let mut channels: HashMap<TransportKind, Arc<dyn TransportChannel>> = HashMap::new();
        channels.insert(TransportKind::Poll, poll.clone());
        channels.insert(
            TransportKind::Stream,
            Arc::new(StreamChannel::new(Arc::clone(&backend))),
        );
        if let Some((hub, _)) = &push {
            channels.insert(TransportKind::Push, Arc::new(PushChannel::new(Arc::clone(hub))));
        }
        for channel in self.channels {
            channels.insert(channel.kind(), channel);
        }
        if !channels.contains_key(&config.queued_transport) {
            return Err(BuildError::TransportNotConfigured(config.queued_transport));
        }

        let (completion_tx, completions) = mpsc::unbounded_channel::<TaskOutcome>();
        let sink = move |outcome: TaskOutcome| {
            // 受信側が止まっていたら捨てる（shutdown 後）
            let _ = completion_tx.send(outcome);
        };
        let tracker = TaskTracker::with_status_source(Arc::new(sink), Arc::clone(&clock), poll);
        let probe = ReadinessProbe::new(Arc::clone(&backend), clock);

        Ok(Supervisor::from_parts(Parts {
            config,
            backend,
            probe,
            tracker,
            channels,
            push,
            completions,
        }))
    }
}

fn connection(config: &SyncConfig, url: &str) -> PushConnection {
    PushConnection::new(url, config.push_reconnect_delay())
}
