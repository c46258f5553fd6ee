//! Backend port - ドキュメント管理バックエンドへの RPC
//!
//! 本番実装は `impls::HttpBackend`（reqwest）。
//! テストではスクリプト化した実装に差し替える。

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::{BackendStatus, TaskId, TaskStatusReport, Upload, UploadReceipt};
use crate::error::BackendError;

/// Stream of decoded event payloads from `GET /upload/stream-status/{filename}`.
pub type StatusStream = BoxStream<'static, Result<String, BackendError>>;

/// Collaborator contract of the backend.
///
/// Every call is a plain request/response except [`Backend::open_status_stream`],
/// which hands back a long-lived server-initiated stream.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /status`
    async fn status(&self) -> Result<BackendStatus, BackendError>;

    /// `GET /documents`
    async fn documents(&self) -> Result<Vec<String>, BackendError>;

    /// `DELETE /documents/{name}`
    async fn delete_document(&self, name: &str) -> Result<(), BackendError>;

    /// `POST /upload` (multipart field `file`)
    async fn upload(&self, upload: Upload) -> Result<UploadReceipt, BackendError>;

    /// `GET /task_status/{task_id}`
    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusReport, BackendError>;

    /// `GET /upload/stream-status/{filename}`
    async fn open_status_stream(&self, filename: &TaskId) -> Result<StatusStream, BackendError>;

    /// `GET /get_models`
    async fn models(&self) -> Result<Vec<String>, BackendError>;
}
