//! App - アプリケーション層
//!
//! ports を組み合わせて同期エンジンを組み立てる。
//!
//! # 主要コンポーネント
//! - **TaskTracker**: タスクごとの状態機械と「完了通知はちょうど 1 回」の保証
//! - **TaskHandle**: 呼び出し側から見たタスク（wait / reconcile / cancel）
//! - **ReadinessProbe**: `GET /status` の 1 回分
//! - **Supervisor**: probe ループ、submit のゲート、完了時のドキュメント再取得
//! - **SupervisorBuilder**: ワイヤリングと起動時検証

pub mod builder;
pub mod handle;
pub mod probe;
pub mod supervisor;
pub mod tracker;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SupervisorBuilder};
pub use self::handle::TaskHandle;
pub use self::probe::ReadinessProbe;
pub use self::supervisor::{OutcomeHook, ReadyHook, Supervisor};
pub use self::tracker::{Applied, Resolution, TaskTracker};
