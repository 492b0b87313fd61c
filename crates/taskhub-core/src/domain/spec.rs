//! Input specs (TaskToCreate -> TaskSpec).
//!
//! `TaskToCreate` is what callers send; it is loosely typed so an HTTP layer
//! can deserialize it directly. `TaskSpec` is the validated form that the
//! worker pool and task bodies consume.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{Result, TaskError};
use super::task_type::TaskType;

/// Upper bound for `duration_ms` (24h).
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

/// Caller-supplied request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskToCreate {
    pub task_type: String,

    /// How long the body should take (simulated work).
    #[serde(default)]
    pub duration_ms: u64,

    /// Per-task timeout override. Falls back to the pool default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Free-form body parameters (url, path, ...).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskToCreate {
    pub fn new(task_type: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_type: task_type.into(),
            duration_ms,
            timeout_ms: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Convenience constructor for `delay` tasks.
    pub fn delay(duration: Duration) -> Self {
        Self::new("delay", duration.as_millis() as u64)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Validate at the submission boundary.
    pub fn validate(&self) -> Result<TaskSpec> {
        let task_type: TaskType = self.task_type.parse()?;

        if self.duration_ms > MAX_DURATION_MS {
            return Err(TaskError::InvalidArgument(format!(
                "duration_ms {} exceeds maximum of {MAX_DURATION_MS}",
                self.duration_ms
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(TaskError::InvalidArgument(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(self.payload.is_null() || self.payload.is_object()) {
            return Err(TaskError::InvalidArgument(
                "payload must be a JSON object".to_string(),
            ));
        }

        Ok(TaskSpec {
            task_type,
            duration: Duration::from_millis(self.duration_ms),
            timeout: self.timeout_ms.map(Duration::from_millis),
            payload: self.payload.clone(),
        })
    }
}

/// Validated, immutable task description.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub task_type: TaskType,
    pub duration: Duration,
    pub timeout: Option<Duration>,
    pub payload: serde_json::Value,
}

impl TaskSpec {
    /// String field from the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}
