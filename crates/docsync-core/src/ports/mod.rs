//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! 外部（バックエンド HTTP, SSE, WebSocket）への依存はすべてこの trait 越しに行い、
//! Tracker / Supervisor は実装の詳細を知らない。

pub mod backend;
pub mod channel;
pub mod clock;
pub mod completion;
pub mod status_source;

// 主要な trait を再エクスポート
pub use self::backend::{Backend, StatusStream};
pub use self::channel::{EventStream, TransportChannel, TransportKind};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::completion::CompletionSink;
pub use self::status_source::StatusSource;
