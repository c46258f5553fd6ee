//! Events - トランスポートが配送するステータスイベント
//!
//! - `StatusEvent`: 正規化済みの `(state, detail)`
//! - `ChannelEvent`: チャネルが Tracker に渡すもの（状態 / 再同期要求 / 配送路の失敗）
//! - `TaskStatusReport`, `PushFrame`: バックエンドのワイヤ形式

use serde::{Deserialize, Serialize};

use super::{TaskId, TaskState};
use crate::error::TransportError;

/// Literal status that closes the upload phase on the push connection.
pub const UPLOAD_COMPLETE: &str = "Upload complete";

/// Literal status that signals successful processing on the push connection.
pub const PROCESSING_COMPLETE: &str = "Processing complete";

/// Literal payload that terminates the status stream.
pub const STREAM_COMPLETED: &str = "completed";

/// One normalized status observation for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub state: TaskState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusEvent {
    pub fn new(state: TaskState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: Some(detail.into()),
        }
    }

    /// An event without any detail text.
    pub fn bare(state: TaskState) -> Self {
        Self {
            state,
            detail: None,
        }
    }

    /// Interpret one payload from `GET /upload/stream-status/{filename}`.
    ///
    /// `completed` is terminal; everything else means the backend is still working.
    pub fn from_stream_payload(payload: &str) -> Self {
        let trimmed = payload.trim();
        if trimmed == STREAM_COMPLETED {
            Self::new(TaskState::Succeeded, STREAM_COMPLETED)
        } else {
            Self::new(TaskState::Running, trimmed)
        }
    }
}

/// What a transport channel hands to the tracker.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A status observation.
    Status(StatusEvent),

    /// Delivery may have been missed (shared connection reconnected, subscriber lagged).
    /// The tracker answers with a reconciliation read.
    Resync,

    /// The delivery path failed. This is not a task outcome.
    Failed(TransportError),
}

/// Body of `GET /task_status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub state: String,

    #[serde(default)]
    pub status: Option<String>,
}

impl TaskStatusReport {
    /// Normalize into a [`StatusEvent`]. Unknown Celery states yield `None`.
    pub fn to_event(&self) -> Option<StatusEvent> {
        let state = TaskState::from_celery(&self.state)?;
        Some(StatusEvent {
            state,
            detail: self.status.clone(),
        })
    }
}

/// Message kind on the shared push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    UploadStatus,
    ProcessingStatus,

    /// Anything else the server broadcasts (chat, heartbeats, ...).
    #[serde(other)]
    Other,
}

/// One inbound message on the push connection: `{type, status, task_id?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub kind: PushKind,

    #[serde(default)]
    pub status: String,

    /// Frames without an id only tell subscribers that something changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl PushFrame {
    pub fn new(kind: PushKind, status: impl Into<String>) -> Self {
        Self {
            kind,
            status: status.into(),
            task_id: None,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Is this frame addressed to `task_id`? Unaddressed frames never are.
    pub fn concerns(&self, task_id: &TaskId) -> bool {
        self.task_id.as_ref() == Some(task_id)
    }

    pub fn is_unaddressed(&self) -> bool {
        self.task_id.is_none()
    }

    /// Map to a status event, or `None` when the frame carries no state change.
    pub fn to_event(&self) -> Option<StatusEvent> {
        let status = self.status.trim();
        match self.kind {
            PushKind::UploadStatus if status == UPLOAD_COMPLETE => {
                Some(StatusEvent::new(TaskState::Pending, status))
            }
            // アップロード中の進捗は Submitted 相当なので状態は動かない
            PushKind::UploadStatus => None,
            PushKind::ProcessingStatus if status == PROCESSING_COMPLETE => {
                Some(StatusEvent::new(TaskState::Succeeded, status))
            }
            PushKind::ProcessingStatus if is_failure_status(status) => {
                Some(StatusEvent::new(TaskState::Failed, status))
            }
            PushKind::ProcessingStatus => Some(StatusEvent::new(TaskState::Running, status)),
            PushKind::Other => None,
        }
    }
}

fn is_failure_status(status: &str) -> bool {
    let lower = status.to_ascii_lowercase();
    lower.starts_with("error") || lower.starts_with("failed")
}
