//! Task record: the mutable state of one submitted task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{Result, TaskError};
use super::ids::TaskId;
use super::state::TaskStatus;
use super::task_type::TaskType;

/// Why a task ended `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The body ran longer than its timeout.
    Timeout,
    /// The body returned an error or panicked.
    ExecutionFault,
}

/// A requested state change, carrying its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Queued -> Processing
    Start,
    /// Processing -> Completed
    Complete(String),
    /// Processing -> Failed
    Fail { error: String, kind: FailureKind },
    /// Queued | Processing -> Cancelled
    Cancel,
}

impl Transition {
    pub fn target(&self) -> TaskStatus {
        match self {
            Transition::Start => TaskStatus::Processing,
            Transition::Complete(_) => TaskStatus::Completed,
            Transition::Fail { .. } => TaskStatus::Failed,
            Transition::Cancel => TaskStatus::Cancelled,
        }
    }
}

/// Metadata + outcome for a task.
///
/// Design:
/// - Owned by the store; everyone else sees clones (snapshots).
/// - All state changes go through [`TaskRecord::apply`].
/// - `result` and `error` are never both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,

    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task_type: TaskType, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type,
            status: TaskStatus::Queued,
            submitted_at,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            error_kind: None,
        }
    }

    /// Validate and apply a transition. Returns the previous status.
    ///
    /// The record is left untouched when the transition is illegal.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<TaskStatus> {
        let from = self.status;
        let to = transition.target();
        if !from.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from,
                to,
            });
        }

        match transition {
            Transition::Start => {
                self.started_at = Some(now);
            }
            Transition::Complete(result) => {
                self.result = Some(result);
                self.error = None;
                self.error_kind = None;
                self.finished_at = Some(now);
            }
            Transition::Fail { error, kind } => {
                self.result = None;
                self.error = Some(error);
                self.error_kind = Some(kind);
                self.finished_at = Some(now);
            }
            Transition::Cancel => {
                self.finished_at = Some(now);
            }
        }
        self.status = to;
        Ok(from)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
