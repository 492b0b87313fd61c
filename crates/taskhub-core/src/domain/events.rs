//! Events - 状態変化イベント
//!
//! - TaskEvent: 状態遷移 1 回につき 1 件。作成後は変更されない
//! - StreamItem: 購読者が受け取る単位（イベント or 欠落マーカー）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::record::TaskRecord;
use super::state::TaskStatus;

/// One status change of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// `None` for the creation event.
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    /// Record state right after the change.
    pub snapshot: TaskRecord,
}

impl TaskEvent {
    pub fn created(snapshot: TaskRecord) -> Self {
        Self {
            task_id: snapshot.id.clone(),
            old_status: None,
            new_status: snapshot.status,
            timestamp: snapshot.submitted_at,
            snapshot,
        }
    }

    pub fn transitioned(old_status: TaskStatus, timestamp: DateTime<Utc>, snapshot: TaskRecord) -> Self {
        Self {
            task_id: snapshot.id.clone(),
            old_status: Some(old_status),
            new_status: snapshot.status,
            timestamp,
            snapshot,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.new_status.is_terminal()
    }
}

/// What happens when a subscriber's buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest buffered event.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
    /// Close the subscription.
    Disconnect,
}

/// Item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamItem {
    Event(TaskEvent),
    /// `missed` events were lost because of `policy`.
    Gap { missed: u64, policy: OverflowPolicy },
}

impl StreamItem {
    pub fn as_event(&self) -> Option<&TaskEvent> {
        match self {
            StreamItem::Event(event) => Some(event),
            StreamItem::Gap { .. } => None,
        }
    }

    pub fn into_event(self) -> Option<TaskEvent> {
        match self {
            StreamItem::Event(event) => Some(event),
            StreamItem::Gap { .. } => None,
        }
    }
}
