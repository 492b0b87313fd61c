//! Errors - エラー型と分類
//!
//! 境界を越えるエラーはすべて `TaskError` に集約します。
//! - InvalidArgument / DuplicateId / NotFound: 呼び出し側の問題
//! - QueueFull / Overloaded: バックプレッシャー（リトライで回復可能）
//! - Timeout / ExecutionFault: タスク本体の失敗（TaskRecord に記録され、伝播しない）
//! - InvalidTransition: 状態機械違反（正しく動いていれば起きない）

use std::time::Duration;

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

pub type Result<T, E = TaskError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task {0} already exists")]
    DuplicateId(TaskId),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("queue is full (capacity={capacity})")]
    QueueFull { capacity: usize },

    #[error("service overloaded: queue capacity {capacity} reached, retry later")]
    Overloaded { capacity: usize },

    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("execution fault: {0}")]
    ExecutionFault(String),

    #[error("worker pool is shutting down")]
    ShuttingDown,
}

impl TaskError {
    /// Can the caller expect the same request to succeed later?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::QueueFull { .. } | TaskError::Overloaded { .. }
        )
    }

    /// Suggested status code for an HTTP front end.
    pub fn http_status(&self) -> u16 {
        match self {
            TaskError::InvalidArgument(_) => 400,
            TaskError::NotFound(_) => 404,
            TaskError::DuplicateId(_) => 409,
            TaskError::QueueFull { .. } | TaskError::Overloaded { .. } => 429,
            TaskError::ShuttingDown => 503,
            TaskError::InvalidTransition { .. }
            | TaskError::Timeout(_)
            | TaskError::ExecutionFault(_) => 500,
        }
    }
}
