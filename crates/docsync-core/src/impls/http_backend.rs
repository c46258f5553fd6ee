//! HttpBackend - reqwest による Backend 実装
//!
//! # エラーの扱い
//! - 2xx 以外はボディの `{error}` をメッセージとして取り出す（UI に出していた文言）
//! - 503 でボディが無ければ「初期化中」のメッセージ
//! - 通常の RPC にはリクエスト単位のタイムアウト、SSE ストリームには付けない

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;

use super::sse;
use crate::domain::receipt::UploadResponse;
use crate::domain::{BackendStatus, TaskId, TaskStatusReport, Upload, UploadReceipt};
use crate::error::BackendError;
use crate::ports::{Backend, StatusStream};

const NOT_INITIALIZED: &str = "Backend is not fully initialized yet";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ModelsBody {
    #[serde(default)]
    models: Vec<String>,
}

/// Backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpBackend {
    /// `base_url` is the API root, e.g. `http://localhost:9090/api`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Decode(format!("invalid backend url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Decode(format!(
                "backend url '{base_url}' cannot carry a path"
            )));
        }
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(BackendError::from)?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn checked(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { error }) => error,
            Err(_) if status == StatusCode::SERVICE_UNAVAILABLE => NOT_INITIALIZED.to_string(),
            Err(_) if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
            Err(_) => body.trim().to_string(),
        };
        Err(BackendError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .get(self.url(segments))
            .timeout(self.timeout)
            .send()
            .await?;
        let response = Self::checked(response).await?;
        response.json::<T>().await.map_err(BackendError::from)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn status(&self) -> Result<BackendStatus, BackendError> {
        self.get_json(&["status"]).await
    }

    async fn documents(&self) -> Result<Vec<String>, BackendError> {
        self.get_json(&["documents"]).await
    }

    async fn delete_document(&self, name: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(&["documents", name]))
            .timeout(self.timeout)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn upload(&self, upload: Upload) -> Result<UploadReceipt, BackendError> {
        let part = reqwest::multipart::Part::bytes(upload.bytes).file_name(upload.file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        // アップロード本体は大きくなり得るので timeout は付けない
        let response = self
            .client
            .post(self.url(&["upload"]))
            .multipart(form)
            .send()
            .await?;
        let response = Self::checked(response).await?;
        let body = response.text().await?;
        let decoded: UploadResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Decode(format!("upload response {body:?}: {e}")))?;
        Ok(decoded.into())
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusReport, BackendError> {
        self.get_json(&["task_status", task_id.as_str()]).await
    }

    async fn open_status_stream(&self, filename: &TaskId) -> Result<StatusStream, BackendError> {
        let response = self
            .client
            .get(self.url(&["upload", "stream-status", filename.as_str()]))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::checked(response).await?;
        Ok(sse::data_stream(response.bytes_stream()))
    }

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        let body: ModelsBody = self.get_json(&["get_models"]).await?;
        Ok(body.models)
    }
}
