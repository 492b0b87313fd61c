//! TaskStore port - タスク状態の正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - TaskRecord（状態・結果・タイムスタンプ）
//! - 状態遷移の検証（単調、後戻りなし）
//! - 遷移ごとの TaskEvent 発行（EventSink へ）
//!
//! # 設計原則
//! - 状態遷移とイベント発行は同一のクリティカルセクション内
//!   （同じ TaskId のイベント順序 = 遷移順序）
//! - Worker は record を直接触らない。必ず `transition` を経由する

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Result, TaskId, TaskRecord, TaskStatus, TaskType, Transition};
use crate::observability::TaskCounts;

/// Filter for [`TaskStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    /// Inclusive lower bound on `submitted_at`.
    pub submitted_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `submitted_at`.
    pub submitted_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn between(mut self, after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.submitted_after = Some(after);
        self.submitted_before = Some(before);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(status) = self.status
            && record.status != status
        {
            return false;
        }
        if let Some(after) = self.submitted_after
            && record.submitted_at < after
        {
            return false;
        }
        if let Some(before) = self.submitted_before
            && record.submitted_at >= before
        {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new `Queued` record. `DuplicateId` if the id exists.
    async fn create(&self, id: TaskId, task_type: TaskType) -> Result<TaskRecord>;

    /// Validate and apply a transition atomically, returning the updated record.
    async fn transition(&self, id: &TaskId, transition: Transition) -> Result<TaskRecord>;

    async fn get(&self, id: &TaskId) -> Result<TaskRecord>;

    /// Point-in-time snapshot ordered by submission time (ascending).
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;

    async fn counts(&self) -> Result<TaskCounts>;
}
