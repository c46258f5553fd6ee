//! Readiness - バックエンドの準備状態
//!
//! `ready` は必須サブシステム（tokenizer, vector store）のフラグの論理積。
//! Supervisor が唯一の所有者で、他のコンポーネントは読み取り専用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `GET /status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    #[serde(default)]
    pub nltk_ready: bool,

    #[serde(default)]
    pub chroma_ready: bool,

    #[serde(default)]
    pub error: Option<String>,
}

impl BackendStatus {
    /// Conjunction of every required subsystem flag.
    pub fn is_ready(&self) -> bool {
        self.nltk_ready && self.chroma_ready
    }
}

/// Process-wide readiness as last observed by the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessState {
    pub ready: bool,

    /// Last probe failure reason, cleared on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the probe last ran. `None` before the first tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ReadinessState {
    /// State at supervisor start: not ready, never probed.
    pub fn initial() -> Self {
        Self::default()
    }

    /// The status endpoint answered.
    pub fn observed(status: &BackendStatus, now: DateTime<Utc>) -> Self {
        let ready = status.is_ready();
        Self {
            ready,
            last_error: if ready { None } else { status.error.clone() },
            checked_at: Some(now),
        }
    }

    /// The status endpoint could not be reached or decoded.
    pub fn unreachable(reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            ready: false,
            last_error: Some(reason.into()),
            checked_at: Some(now),
        }
    }
}
