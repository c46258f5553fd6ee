//! SyncConfig - エンジンの設定
//!
//! 優先順位（低 → 高）:
//! 1. 組み込みデフォルト
//! 2. TOML ファイル（任意）
//! 3. 環境変数 `DOCSYNC_*`（`.env` があれば先に読む）

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::ports::TransportKind;

pub const ENV_BACKEND_URL: &str = "DOCSYNC_BACKEND_URL";
pub const ENV_PUSH_URL: &str = "DOCSYNC_PUSH_URL";
pub const ENV_PROBE_INTERVAL_MS: &str = "DOCSYNC_PROBE_INTERVAL_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "DOCSYNC_POLL_INTERVAL_MS";
pub const ENV_POLL_FAILURE_BUDGET: &str = "DOCSYNC_POLL_FAILURE_BUDGET";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "DOCSYNC_REQUEST_TIMEOUT_MS";
pub const ENV_PUSH_RECONNECT_DELAY_MS: &str = "DOCSYNC_PUSH_RECONNECT_DELAY_MS";
pub const ENV_QUEUED_TRANSPORT: &str = "DOCSYNC_QUEUED_TRANSPORT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// API root, e.g. `http://localhost:9090/api`.
    pub backend_url: String,
    /// Shared push connection (`ws://...`). Push tracking is off without it.
    pub push_url: Option<String>,
    pub probe_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Consecutive failed polls before the task fails with a transport error.
    pub poll_failure_budget: u32,
    pub request_timeout_ms: u64,
    pub push_reconnect_delay_ms: u64,
    /// Transport used when the backend answers an upload with a task id.
    pub queued_transport: TransportKind,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:9090/api".to_string(),
            push_url: None,
            probe_interval_ms: 5_000,
            poll_interval_ms: 1_000,
            poll_failure_budget: 1,
            request_timeout_ms: 5_000,
            push_reconnect_delay_ms: 2_000,
            queued_transport: TransportKind::Poll,
        }
    }
}

impl SyncConfig {
    /// Defaults, then `path` (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| SyncError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Environment only.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::load(None)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SyncError> {
        toml::from_str(raw).map_err(|e| SyncError::Config(format!("invalid config file: {e}")))
    }

    /// Overlay values from `lookup` (normally `std::env::var`).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            self.backend_url = url;
        }
        if let Some(url) = lookup(ENV_PUSH_URL) {
            self.push_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some(v) = env_parse(&lookup, ENV_PROBE_INTERVAL_MS)? {
            self.probe_interval_ms = v;
        }
        if let Some(v) = env_parse(&lookup, ENV_POLL_INTERVAL_MS)? {
            self.poll_interval_ms = v;
        }
        if let Some(v) = env_parse(&lookup, ENV_POLL_FAILURE_BUDGET)? {
            self.poll_failure_budget = v;
        }
        if let Some(v) = env_parse(&lookup, ENV_REQUEST_TIMEOUT_MS)? {
            self.request_timeout_ms = v;
        }
        if let Some(v) = env_parse(&lookup, ENV_PUSH_RECONNECT_DELAY_MS)? {
            self.push_reconnect_delay_ms = v;
        }
        if let Some(v) = env_parse(&lookup, ENV_QUEUED_TRANSPORT)? {
            self.queued_transport = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let positive = [
            ("probe_interval_ms", self.probe_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("push_reconnect_delay_ms", self.push_reconnect_delay_ms),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(SyncError::Config(format!("{key} must be greater than zero")));
        }
        if self.poll_failure_budget == 0 {
            return Err(SyncError::Config(
                "poll_failure_budget must be at least 1".to_string(),
            ));
        }
        if self.queued_transport == TransportKind::Stream {
            return Err(SyncError::Config(
                "queued_transport must be poll or push; stream is chosen per upload".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn push_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.push_reconnect_delay_ms)
    }
}

fn env_parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, SyncError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SyncError::Config(format!("failed to parse {key}={raw}: {e}"))),
        None => Ok(None),
    }
}
