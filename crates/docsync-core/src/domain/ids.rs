//! Domain identifiers.
//!
//! TaskId はバックエンドが払い出す不透明な識別子です。
//! - poll/push 追跡: Celery の task_id
//! - stream 追跡: アップロードしたファイル名
//! - 同期完了モード: クライアント側で ULID から生成（`local-` プレフィックス）

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const LOCAL_PREFIX: &str = "local-";

/// Identifier of one ingestion task.
///
/// The value is opaque: the engine only compares and displays it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a client-side id for uploads the backend completed synchronously.
    ///
    /// ULID なので生成順にソートでき、調整なしで衝突しない。
    pub fn local() -> Self {
        Self(format!("{LOCAL_PREFIX}{}", Ulid::new()))
    }

    /// Was this id generated on the client rather than assigned by the backend?
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
