//! docsync-core
//!
//! Task status synchronization for a document-ingestion backend.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, events, readiness, outcome, receipt）
//! - **ports**: 抽象化レイヤー（Backend, TransportChannel, StatusSource, CompletionSink, Clock）
//! - **impls**: 実装（HttpBackend, PollChannel, StreamChannel, PushChannel + PushHub）
//! - **app**: アプリケーションロジック（TaskTracker, ReadinessProbe, Supervisor, builder）
//! - **config**: 設定（デフォルト → TOML → 環境変数）
//! - **error**: エラー型
//! - **observability**: tracing の初期化と集計ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{Supervisor, SupervisorBuilder, TaskHandle, TaskTracker};
pub use config::SyncConfig;
pub use error::{BackendError, SyncError, TransportError};
