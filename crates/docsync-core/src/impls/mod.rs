//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **HttpBackend**: reqwest による Backend（`/status`, `/documents`, `/upload`, ...）
//! - **PollChannel**: 固定間隔の `GET /task_status/{id}`
//! - **StreamChannel**: アップロードごとの SSE ストリーム
//! - **PushChannel** + **PushHub** + **PushConnection**: 共有 WebSocket 接続のフィルタ購読
//!
//! テスト用の差し替え実装は `crate::testing`（cfg(test)）にある。

pub mod http_backend;
pub mod poll;
pub mod push;
pub mod sse;
pub mod stream;
pub mod ws_driver;

// 主要な型を再エクスポート
pub use self::http_backend::HttpBackend;
pub use self::poll::PollChannel;
pub use self::push::{PushChannel, PushHub, PushSignal};
pub use self::sse::{SseDecoder, data_stream};
pub use self::stream::StreamChannel;
pub use self::ws_driver::PushConnection;
