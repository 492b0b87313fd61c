use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::TaskError;

/// Kind of work a task body simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Sleep for the requested duration.
    Delay,
    /// Simulated outbound HTTP call.
    HttpCall,
    /// Simulated file read/write.
    FileOperation,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Delay => "delay",
            TaskType::HttpCall => "http_call",
            TaskType::FileOperation => "file_operation",
        }
    }
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delay" => Ok(TaskType::Delay),
            "http" | "http_call" => Ok(TaskType::HttpCall),
            "file" | "file_operation" => Ok(TaskType::FileOperation),
            other => Err(TaskError::InvalidArgument(format!(
                "unknown task type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
