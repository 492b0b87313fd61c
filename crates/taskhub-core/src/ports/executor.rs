//! TaskExecutor port - タスク本体の実行
//!
//! Worker は dequeue したタスクについてのみ `execute` を呼びます
//! （「実行は worker が取り出した時だけ」）。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{Result, TaskId, TaskSpec};

/// Runs the body of one task.
///
/// - `Ok(result)`: the task completes with `result` as its payload.
/// - `Err(_)`: the task fails; the worker records the message.
///
/// Implementations should check `cancel` at bounded intervals. The worker
/// also aborts the body when the token fires or the timeout elapses, so a
/// body that never checks is still stopped at its next await point.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, id: &TaskId, spec: &TaskSpec, cancel: &CancellationToken) -> Result<String>;
}
