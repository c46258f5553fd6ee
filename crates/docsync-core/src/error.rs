use std::path::PathBuf;

use thiserror::Error;

use crate::domain::TaskId;
use crate::ports::TransportKind;

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Submission (or another gated call) while the backend is not ready.
    #[error("backend is not ready{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    NotReady { reason: Option<String> },

    /// The same task id was bound twice.
    #[error("task {0} is already being tracked")]
    AlreadyTracking(TaskId),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("task {task_id} failed: {detail}")]
    TaskFailure { task_id: TaskId, detail: String },

    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The upload response asked for a transport this deployment has not configured.
    #[error("{0:?} transport is not configured")]
    TransportUnavailable(TransportKind),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A delivery-path failure. Never a task outcome by itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("status endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("status endpoint returned {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("malformed status message: {0}")]
    Decode(String),

    #[error("status stream closed before completion")]
    StreamClosed,

    #[error("push connection lost")]
    ConnectionLost,
}

/// A plain RPC against the backend failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Non-2xx; `message` is the backend's `{error}` text when it sent one.
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Unreachable(err.to_string())
        }
    }
}

impl From<BackendError> for TransportError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unreachable(detail) => TransportError::Unreachable(detail),
            BackendError::Status { status, message } => TransportError::Http {
                status,
                detail: message,
            },
            BackendError::Decode(detail) => TransportError::Decode(detail),
        }
    }
}
