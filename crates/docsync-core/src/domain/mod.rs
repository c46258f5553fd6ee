//! Domain model (ids, task state machine, events, readiness, outcomes).
//!
//! このモジュールはトランスポートや HTTP を知らない。
//! 状態遷移のルールはすべてここにある。

pub mod events;
pub mod ids;
pub mod outcome;
pub mod readiness;
pub mod receipt;
pub mod state;
pub mod task;

pub use events::{ChannelEvent, PushFrame, PushKind, StatusEvent, TaskStatusReport};
pub use ids::TaskId;
pub use outcome::{FailureCause, TaskOutcome};
pub use readiness::{BackendStatus, ReadinessState};
pub use receipt::{Upload, UploadReceipt};
pub use state::TaskState;
pub use task::{Task, Transition};
