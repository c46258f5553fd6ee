//! Supervisor end to end against the fake backend (poll and stream transports).

mod support;

use std::collections::VecDeque;
use std::time::Duration;

use docsync_core::domain::{FailureCause, TaskOutcome, Upload};
use docsync_core::ports::TransportKind;
use docsync_core::{Supervisor, SupervisorBuilder, SyncError};
use serde_json::json;
use support::TestServer;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Observed {
    succeeded: mpsc::UnboundedReceiver<TaskOutcome>,
    failed: mpsc::UnboundedReceiver<TaskOutcome>,
}

fn observe(supervisor: &Supervisor) -> Observed {
    let (ok_tx, succeeded) = mpsc::unbounded_channel();
    let (err_tx, failed) = mpsc::unbounded_channel();
    supervisor.on_task_succeeded(move |o| {
        let _ = ok_tx.send(o.clone());
    });
    supervisor.on_task_failed(move |o| {
        let _ = err_tx.send(o.clone());
    });
    Observed { succeeded, failed }
}

async fn ready_supervisor(server: &TestServer) -> Supervisor {
    let supervisor = SupervisorBuilder::new(server.config()).build().unwrap();
    supervisor.start();
    let mut readiness = supervisor.subscribe_readiness();
    timeout(WAIT, readiness.wait_for(|r| r.ready))
        .await
        .unwrap()
        .unwrap();
    // 立ち上がりエッジの再取得が終わるまで待つ
    timeout(WAIT, async {
        while server.documents_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    supervisor
}

#[tokio::test]
async fn rejects_uploads_until_the_backend_is_ready() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.ready = false;
        s.not_ready_error = Some("NLTK data is downloading".to_string());
    });
    let supervisor = SupervisorBuilder::new(server.config()).build().unwrap();

    let state = supervisor.probe_now().await;
    assert!(!state.ready);

    let err = supervisor
        .submit(Upload::new("a.txt", b"a".to_vec()))
        .await
        .unwrap_err();
    match err {
        SyncError::NotReady { reason } => {
            assert_eq!(reason.as_deref(), Some("NLTK data is downloading"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.uploads().is_empty());
}

#[tokio::test]
async fn becoming_ready_refreshes_documents_once() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.ready = false;
        s.documents = vec!["existing.pdf".to_string()];
    });
    let supervisor = SupervisorBuilder::new(server.config()).build().unwrap();
    supervisor.start();

    // 何回か not ready の probe を通してから ready にする
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(server.documents_calls(), 0);
    server.script(|s| s.ready = true);

    let mut documents = supervisor.subscribe_documents();
    timeout(WAIT, documents.wait_for(|d| !d.is_empty()))
        .await
        .unwrap()
        .unwrap();

    // ready のまま probe が続いても再取得はしない
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.documents_calls(), 1);
    assert_eq!(supervisor.documents(), vec!["existing.pdf"]);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn polled_task_succeeds_once_and_refreshes_documents() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.upload_reply = json!({ "task_id": "celery-7" });
        s.task_states = VecDeque::from([
            ("PENDING".to_string(), None),
            ("STARTED".to_string(), Some("Chunking".to_string())),
            ("SUCCESS".to_string(), Some("Indexed 12 chunks".to_string())),
        ]);
    });
    let supervisor = ready_supervisor(&server).await;
    let mut observed = observe(&supervisor);
    let refreshes_before = server.documents_calls();

    let path = support::temp_file("report.pdf", b"%PDF").await;
    server.script(|s| s.documents = vec!["report.pdf".to_string()]);
    let handle = supervisor.submit_path(&path).await.unwrap();
    assert_eq!(handle.transport(), Some(TransportKind::Poll));
    assert_eq!(handle.task_id().as_str(), "celery-7");

    let outcome = timeout(WAIT, handle.wait_success()).await.unwrap().unwrap();
    assert_eq!(outcome.detail(), "Indexed 12 chunks");

    let delivered = timeout(WAIT, observed.succeeded.recv()).await.unwrap().unwrap();
    assert_eq!(delivered, outcome);
    assert_eq!(server.documents_calls(), refreshes_before + 1);
    assert_eq!(supervisor.documents(), vec!["report.pdf"]);

    // SUCCESS が繰り返し返っても 2 回目の通知は無い
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.succeeded.try_recv().is_err());
    assert!(observed.failed.try_recv().is_err());
    assert_eq!(supervisor.counts().succeeded, 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn polled_failure_is_reported_as_task_failure() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.upload_reply = json!({ "task_id": "celery-8" });
        s.task_states = VecDeque::from([("FAILURE".to_string(), Some("corrupt PDF".to_string()))]);
    });
    let supervisor = ready_supervisor(&server).await;
    let mut observed = observe(&supervisor);

    let handle = supervisor
        .submit(Upload::new("broken.pdf", b"??".to_vec()))
        .await
        .unwrap();
    let outcome = timeout(WAIT, handle.wait()).await.unwrap().unwrap();
    assert_eq!(outcome.failure_cause(), Some(FailureCause::Task));

    let delivered = timeout(WAIT, observed.failed.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.detail(), "corrupt PDF");
    assert!(observed.succeeded.try_recv().is_err());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_task_id_fails_with_a_transport_error() {
    let server = TestServer::start().await;
    // task_states が空なので /task_status は 404
    server.script(|s| s.upload_reply = json!({ "task_id": "lost" }));
    let supervisor = ready_supervisor(&server).await;

    let handle = supervisor
        .submit(Upload::new("a.txt", b"a".to_vec()))
        .await
        .unwrap();
    let outcome = timeout(WAIT, handle.wait()).await.unwrap().unwrap();
    assert_eq!(outcome.failure_cause(), Some(FailureCause::Transport));
    assert!(outcome.detail().contains("404"), "{}", outcome.detail());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn streamed_upload_completes_on_completed_payload() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.upload_reply = json!({ "filename": "notes.txt" });
        s.stream_payloads = vec![
            "Processing page 1".to_string(),
            "Processing page 2".to_string(),
            "completed".to_string(),
        ];
    });
    let supervisor = ready_supervisor(&server).await;
    let mut observed = observe(&supervisor);

    let handle = supervisor
        .submit(Upload::new("notes.txt", b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(handle.transport(), Some(TransportKind::Stream));

    let outcome = timeout(WAIT, handle.wait_success()).await.unwrap().unwrap();
    assert_eq!(outcome.task_id().as_str(), "notes.txt");
    timeout(WAIT, observed.succeeded.recv()).await.unwrap().unwrap();

    supervisor.shutdown().await;
}

#[tokio::test]
async fn stream_that_ends_early_fails_with_a_transport_error() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.upload_reply = json!({ "filename": "notes.txt" });
        s.stream_payloads = vec!["Processing page 1".to_string()];
    });
    let supervisor = ready_supervisor(&server).await;
    let mut observed = observe(&supervisor);

    let handle = supervisor
        .submit(Upload::new("notes.txt", b"hello".to_vec()))
        .await
        .unwrap();
    let err = timeout(WAIT, handle.wait_success()).await.unwrap().unwrap_err();
    assert!(matches!(err, SyncError::TaskFailure { .. }), "{err:?}");

    let delivered = timeout(WAIT, observed.failed.recv()).await.unwrap().unwrap();
    assert_eq!(delivered.failure_cause(), Some(FailureCause::Transport));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn synchronous_upload_needs_no_transport() {
    let server = TestServer::start().await;
    let supervisor = ready_supervisor(&server).await;
    let mut observed = observe(&supervisor);

    let handle = supervisor
        .submit(Upload::new("tiny.txt", b"x".to_vec()))
        .await
        .unwrap();
    assert_eq!(handle.transport(), None);
    let outcome = handle.outcome().expect("already finished");
    assert_eq!(outcome.detail(), "File uploaded and embedded successfully");

    timeout(WAIT, observed.succeeded.recv()).await.unwrap().unwrap();
    supervisor.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_tracked_tasks() {
    let server = TestServer::start().await;
    server.script(|s| {
        s.upload_reply = json!({ "task_id": "slow" });
        s.task_states = VecDeque::from([("STARTED".to_string(), None)]);
    });
    let supervisor = ready_supervisor(&server).await;

    let handle = supervisor
        .submit(Upload::new("big.pdf", b"x".to_vec()))
        .await
        .unwrap();
    supervisor.shutdown().await;

    let err = timeout(WAIT, handle.wait()).await.unwrap().unwrap_err();
    assert!(matches!(err, SyncError::Cancelled(_)));
    assert_eq!(supervisor.counts().active, 0);
}
