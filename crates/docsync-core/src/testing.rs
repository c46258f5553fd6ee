//! テスト用の差し替え実装
//!
//! - ScriptedBackend: 応答をスクリプトできる Backend
//! - ScriptedChannel: テストが mpsc 送信側を握るトランスポート
//! - RecordingSink: 受け取った outcome を記録する CompletionSink

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::domain::{
    BackendStatus, ChannelEvent, TaskId, TaskOutcome, TaskStatusReport, Upload, UploadReceipt,
};
use crate::error::{BackendError, TransportError};
use crate::ports::{
    Backend, CompletionSink, EventStream, StatusStream, TransportChannel, TransportKind,
};

type ScriptedStream = Result<(Vec<Result<String, BackendError>>, bool), BackendError>;

pub(crate) struct ScriptedBackend {
    status: Mutex<Result<BackendStatus, BackendError>>,
    status_calls: AtomicUsize,
    documents: Mutex<Result<Vec<String>, BackendError>>,
    documents_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    uploads: Mutex<VecDeque<Result<UploadReceipt, BackendError>>>,
    upload_calls: AtomicUsize,
    task_status: Mutex<VecDeque<Result<TaskStatusReport, BackendError>>>,
    task_status_calls: AtomicUsize,
    streams: Mutex<VecDeque<ScriptedStream>>,
    models: Vec<String>,
}

impl ScriptedBackend {
    fn with_status(status: BackendStatus) -> Self {
        Self {
            status: Mutex::new(Ok(status)),
            status_calls: AtomicUsize::new(0),
            documents: Mutex::new(Ok(Vec::new())),
            documents_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            uploads: Mutex::new(VecDeque::new()),
            upload_calls: AtomicUsize::new(0),
            task_status: Mutex::new(VecDeque::new()),
            task_status_calls: AtomicUsize::new(0),
            streams: Mutex::new(VecDeque::new()),
            models: vec!["llama3".to_string(), "mistral".to_string()],
        }
    }

    pub fn ready() -> Self {
        Self::with_status(BackendStatus {
            nltk_ready: true,
            chroma_ready: true,
            error: None,
        })
    }

    pub fn not_ready() -> Self {
        Self::with_status(BackendStatus {
            nltk_ready: true,
            chroma_ready: false,
            error: Some("chroma starting".to_string()),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        *self.status.lock().unwrap() = Ok(BackendStatus {
            nltk_ready: true,
            chroma_ready: ready,
            error: (!ready).then(|| "chroma starting".to_string()),
        });
    }

    pub fn set_unreachable(&self) {
        *self.status.lock().unwrap() =
            Err(BackendError::Unreachable("connection refused".to_string()));
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn set_documents(&self, documents: &[&str]) {
        *self.documents.lock().unwrap() =
            Ok(documents.iter().map(|d| d.to_string()).collect());
    }

    pub fn fail_documents(&self) {
        *self.documents.lock().unwrap() = Err(BackendError::Status {
            status: 500,
            message: "listing failed".to_string(),
        });
    }

    pub fn documents_calls(&self) -> usize {
        self.documents_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn script_upload(&self, receipt: Result<UploadReceipt, BackendError>) {
        self.uploads.lock().unwrap().push_back(receipt);
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn script_task_status<I>(&self, reports: I)
    where
        I: IntoIterator<Item = Result<TaskStatusReport, BackendError>>,
    {
        self.task_status.lock().unwrap().extend(reports);
    }

    pub fn task_status_calls(&self) -> usize {
        self.task_status_calls.load(Ordering::SeqCst)
    }

    /// Queue one status stream. With `hang`, the stream stays open after the items.
    pub fn script_stream(&self, items: Vec<Result<String, BackendError>>, hang: bool) {
        self.streams.lock().unwrap().push_back(Ok((items, hang)));
    }

    pub fn fail_stream_open(&self, err: BackendError) {
        self.streams.lock().unwrap().push_back(Err(err));
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn status(&self) -> Result<BackendStatus, BackendError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().clone()
    }

    async fn documents(&self) -> Result<Vec<String>, BackendError> {
        self.documents_calls.fetch_add(1, Ordering::SeqCst);
        self.documents.lock().unwrap().clone()
    }

    async fn delete_document(&self, name: &str) -> Result<(), BackendError> {
        let mut documents = self.documents.lock().unwrap();
        if let Ok(list) = documents.as_mut() {
            list.retain(|d| d != name);
        }
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn upload(&self, _upload: Upload) -> Result<UploadReceipt, BackendError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Decode("no scripted upload".to_string())))
    }

    async fn task_status(&self, _task_id: &TaskId) -> Result<TaskStatusReport, BackendError> {
        self.task_status_calls.fetch_add(1, Ordering::SeqCst);
        self.task_status
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Unreachable("no scripted status".to_string())))
    }

    async fn open_status_stream(&self, _filename: &TaskId) -> Result<StatusStream, BackendError> {
        let next = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Unreachable("no scripted stream".to_string())));
        let (items, hang) = next?;
        let items = stream::iter(items);
        if hang {
            Ok(items.chain(stream::pending()).boxed())
        } else {
            Ok(items.boxed())
        }
    }

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.models.clone())
    }
}

/// A channel whose events are pushed by the test.
pub(crate) struct ScriptedChannel {
    kind: TransportKind,
    senders: Mutex<Vec<(TaskId, mpsc::Sender<ChannelEvent>)>>,
    fail_open: Mutex<Option<TransportError>>,
    opened: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            senders: Mutex::new(Vec::new()),
            fail_open: Mutex::new(None),
            opened: AtomicUsize::new(0),
        }
    }

    /// Sender feeding the most recent binding for `task_id`.
    pub fn sender(&self, task_id: &TaskId) -> mpsc::Sender<ChannelEvent> {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == task_id)
            .map(|(_, tx)| tx.clone())
            .expect("channel was never opened for this task")
    }

    /// Drop every sender, as if the producer ended without a final event.
    pub fn close_senders(&self) {
        self.senders.lock().unwrap().clear();
    }

    pub fn fail_next_open(&self, err: TransportError) {
        *self.fail_open.lock().unwrap() = Some(err);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportChannel for ScriptedChannel {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn open(&self, task_id: &TaskId) -> Result<EventStream, TransportError> {
        if let Some(err) = self.fail_open.lock().unwrap().take() {
            return Err(err);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push((task_id.clone(), tx));
        Ok(EventStream::from_receiver(rx))
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    outcomes: Arc<Mutex<Vec<TaskOutcome>>>,
}

impl RecordingSink {
    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn count_for(&self, task_id: &TaskId) -> usize {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.task_id() == task_id)
            .count()
    }
}

impl CompletionSink for RecordingSink {
    fn complete(&self, outcome: TaskOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}
