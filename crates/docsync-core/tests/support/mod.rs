//! Fake ingestion backend for integration tests.
//!
//! Serves the same routes as the real API under `/api` plus a `/ws` push
//! endpoint. Tests script responses through [`Script`] and push frames with
//! [`TestServer::push`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use docsync_core::SyncConfig;
use docsync_core::ports::TransportKind;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Mutable behaviour of the fake backend.
pub struct Script {
    pub ready: bool,
    pub not_ready_error: Option<String>,
    pub documents: Vec<String>,
    pub upload_reply: Value,
    /// Celery `(state, status)` pairs served in order; the last one repeats.
    pub task_states: VecDeque<(String, Option<String>)>,
    /// SSE payloads for the status stream.
    pub stream_payloads: Vec<String>,
    pub models: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            ready: true,
            not_ready_error: None,
            documents: Vec::new(),
            upload_reply: json!({ "message": "File uploaded and embedded successfully" }),
            task_states: VecDeque::new(),
            stream_payloads: Vec::new(),
            models: vec!["llama3".to_string()],
        }
    }
}

#[derive(Default)]
pub struct Calls {
    pub status: AtomicUsize,
    pub documents: AtomicUsize,
    pub task_status: AtomicUsize,
    pub ws_connections: AtomicUsize,
}

pub struct Shared {
    pub script: Mutex<Script>,
    pub calls: Calls,
    /// Uploaded `(file name, size)` pairs.
    pub uploads: Mutex<Vec<(String, usize)>>,
    /// `Some(text)` is sent to every socket; `None` drops every socket.
    push_tx: broadcast::Sender<Option<String>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub shared: Arc<Shared>,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl TestServer {
    pub async fn start() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            script: Mutex::new(Script::default()),
            calls: Calls::default(),
            uploads: Mutex::new(Vec::new()),
            push_tx,
        });

        let app = Router::new()
            .route("/api/status", get(status))
            .route("/api/documents", get(documents))
            .route("/api/documents/{name}", delete(delete_document))
            .route("/api/upload", post(upload))
            .route("/api/upload/stream-status/{filename}", get(stream_status))
            .route("/api/task_status/{task_id}", get(task_status))
            .route("/api/get_models", get(models))
            .route("/ws", get(push_socket))
            .with_state(Arc::clone(&shared));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        Self {
            addr,
            shared,
            handle,
        }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Fast intervals, pointed at this server.
    pub fn config(&self) -> SyncConfig {
        SyncConfig {
            backend_url: self.api_url(),
            probe_interval_ms: 20,
            poll_interval_ms: 10,
            request_timeout_ms: 2_000,
            push_reconnect_delay_ms: 20,
            ..SyncConfig::default()
        }
    }

    pub fn push_config(&self) -> SyncConfig {
        SyncConfig {
            push_url: Some(self.ws_url()),
            queued_transport: TransportKind::Push,
            ..self.config()
        }
    }

    pub fn script<R>(&self, edit: impl FnOnce(&mut Script) -> R) -> R {
        edit(&mut self.shared.script.lock().unwrap())
    }

    pub fn push(&self, frame: Value) {
        let _ = self.shared.push_tx.send(Some(frame.to_string()));
    }

    /// Close every open push socket from the server side.
    pub fn drop_push_connections(&self) {
        let _ = self.shared.push_tx.send(None);
    }

    pub fn documents_calls(&self) -> usize {
        self.shared.calls.documents.load(Ordering::SeqCst)
    }

    pub fn task_status_calls(&self) -> usize {
        self.shared.calls.task_status.load(Ordering::SeqCst)
    }

    pub fn ws_connections(&self) -> usize {
        self.shared.calls.ws_connections.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.shared.uploads.lock().unwrap().clone()
    }

    /// Wait until at least `n` push sockets have been accepted.
    pub async fn wait_for_ws_connections(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.ws_connections() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("push connection was not established");
    }
}

/// Write `contents` to a fresh temp file named `name`.
pub async fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("docsync-it-{}", ulid::Ulid::new()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join(name);
    tokio::fs::write(&path, contents).await.unwrap();
    path
}

type AppState = State<Arc<Shared>>;

async fn status(State(shared): AppState) -> Response {
    shared.calls.status.fetch_add(1, Ordering::SeqCst);
    let script = shared.script.lock().unwrap();
    if script.ready {
        Json(json!({ "nltk_ready": true, "chroma_ready": true })).into_response()
    } else {
        let body = json!({
            "nltk_ready": true,
            "chroma_ready": false,
            "error": script.not_ready_error,
        });
        Json(body).into_response()
    }
}

async fn documents(State(shared): AppState) -> Json<Vec<String>> {
    shared.calls.documents.fetch_add(1, Ordering::SeqCst);
    Json(shared.script.lock().unwrap().documents.clone())
}

async fn delete_document(State(shared): AppState, Path(name): Path<String>) -> Response {
    let mut script = shared.script.lock().unwrap();
    let before = script.documents.len();
    script.documents.retain(|d| *d != name);
    if script.documents.len() == before {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Document {name} not found") })),
        )
            .into_response()
    } else {
        Json(json!({ "message": "deleted" })).into_response()
    }
}

async fn upload(State(shared): AppState, mut multipart: Multipart) -> Response {
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap();
        shared.uploads.lock().unwrap().push((name, bytes.len()));
    }
    Json(shared.script.lock().unwrap().upload_reply.clone()).into_response()
}

async fn stream_status(State(shared): AppState, Path(_filename): Path<String>) -> Response {
    let body: String = shared
        .script
        .lock()
        .unwrap()
        .stream_payloads
        .iter()
        .map(|p| format!("data: {p}\n\n"))
        .collect();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn task_status(State(shared): AppState, Path(task_id): Path<String>) -> Response {
    shared.calls.task_status.fetch_add(1, Ordering::SeqCst);
    let mut script = shared.script.lock().unwrap();
    let next = if script.task_states.len() > 1 {
        script.task_states.pop_front()
    } else {
        script.task_states.front().cloned()
    };
    match next {
        Some((state, status)) => Json(json!({ "state": state, "status": status })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown task {task_id}") })),
        )
            .into_response(),
    }
}

async fn models(State(shared): AppState) -> Json<Value> {
    Json(json!({ "models": shared.script.lock().unwrap().models.clone() }))
}

async fn push_socket(State(shared): AppState, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| forward_push(socket, shared))
}

async fn forward_push(mut socket: WebSocket, shared: Arc<Shared>) {
    let mut rx = shared.push_tx.subscribe();
    shared.calls.ws_connections.fetch_add(1, Ordering::SeqCst);
    loop {
        match rx.recv().await {
            Ok(Some(text)) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Ok(None) | Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}
