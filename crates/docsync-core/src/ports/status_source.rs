//! StatusSource port - 再同期（reconciliation）用の単発ステータス取得

use async_trait::async_trait;

use crate::domain::{StatusEvent, TaskId};
use crate::error::TransportError;

/// One-shot direct status read for a task.
///
/// Used by the tracker when delivery may have been missed. `Ok(None)` means the
/// backend answered with a state this client does not understand.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<Option<StatusEvent>, TransportError>;
}
