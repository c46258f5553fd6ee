//! Upload payload and the backend's acknowledgement.
//!
//! `POST /upload` の応答形式でトランスポートが決まる:
//! - `{message}`  → 同期完了（追跡不要）
//! - `{filename}` → Stream で追跡
//! - `{task_id}`  → Poll / Push で追跡

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::TaskId;

/// A file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk; the upload is named after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path.display()),
                )
            })?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { file_name, bytes })
    }
}

/// Wire shape of the upload response. Field precedence: task_id > filename > message.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum UploadResponse {
    Queued { task_id: String },
    Streamed { filename: String },
    Completed { message: String },
}

/// What the backend told us about a submitted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadReceipt {
    /// Ingestion already finished on the backend.
    Completed { message: String },

    /// Track progress on the status stream for this filename.
    Streamed { filename: TaskId },

    /// Track progress by task id (poll or push).
    Queued { task_id: TaskId },
}

impl From<UploadResponse> for UploadReceipt {
    fn from(response: UploadResponse) -> Self {
        match response {
            UploadResponse::Queued { task_id } => Self::Queued {
                task_id: TaskId::new(task_id),
            },
            UploadResponse::Streamed { filename } => Self::Streamed {
                filename: TaskId::new(filename),
            },
            UploadResponse::Completed { message } => Self::Completed { message },
        }
    }
}
