//! SimulatedExecutor - 擬似タスク本体
//!
//! task_type ごとの本体:
//! - delay: 指定時間スリープ
//! - http_call: HTTP 呼び出しの擬似（遅延 + 確率的失敗）
//! - file_operation: ファイル操作の擬似（遅延 + 確率的失敗）
//!
//! http_call / file_operation は payload に `"fail": true` を入れると必ず失敗します（テスト用）。

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::SimulationConfig;
use crate::domain::{Result, TaskError, TaskId, TaskSpec, TaskType};
use crate::ports::TaskExecutor;

pub struct SimulatedExecutor {
    config: SimulationConfig,
}

impl SimulatedExecutor {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    fn latency(&self, spec: &TaskSpec, [min, max]: [u64; 2]) -> Duration {
        if !spec.duration.is_zero() {
            return spec.duration;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
    }

    fn should_fail(&self, spec: &TaskSpec) -> bool {
        if spec.payload.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            return true;
        }
        let p = self.config.failure_probability;
        p > 0.0 && rand::thread_rng().gen_bool(p.min(1.0))
    }

    async fn http_call(&self, spec: &TaskSpec, cancel: &CancellationToken) -> Result<String> {
        let url = spec.payload_str("url").unwrap_or("https://example.invalid/");
        let method = spec.payload_str("method").unwrap_or("GET");
        let latency = self.latency(spec, self.config.http_delay_ms);
        let fail = self.should_fail(spec);

        pause(latency, cancel).await?;
        if fail {
            return Err(TaskError::ExecutionFault(format!(
                "simulated {method} {url} returned 503"
            )));
        }
        Ok(json!({
            "status": 200,
            "method": method,
            "url": url,
            "latency_ms": latency.as_millis() as u64,
        })
        .to_string())
    }

    async fn file_operation(&self, spec: &TaskSpec, cancel: &CancellationToken) -> Result<String> {
        let path = spec.payload_str("path").unwrap_or("/tmp/taskhub.dat");
        let operation = spec.payload_str("operation").unwrap_or("read");
        if !matches!(operation, "read" | "write" | "delete") {
            return Err(TaskError::ExecutionFault(format!(
                "unsupported file operation '{operation}'"
            )));
        }
        let latency = self.latency(spec, self.config.file_delay_ms);
        let fail = self.should_fail(spec);

        pause(latency, cancel).await?;
        if fail {
            return Err(TaskError::ExecutionFault(format!(
                "simulated {operation} of {path} failed: permission denied"
            )));
        }
        Ok(json!({
            "operation": operation,
            "path": path,
            "bytes": spec.payload.get("bytes").and_then(|v| v.as_u64()).unwrap_or(4096),
            "latency_ms": latency.as_millis() as u64,
        })
        .to_string())
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

/// Sleep for `duration` unless cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(TaskError::ExecutionFault("cancelled".to_string())),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, id: &TaskId, spec: &TaskSpec, cancel: &CancellationToken) -> Result<String> {
        match spec.task_type {
            TaskType::Delay => {
                pause(spec.duration, cancel).await?;
                Ok(format!("task {id} slept for {}ms", spec.duration.as_millis()))
            }
            TaskType::HttpCall => self.http_call(spec, cancel).await,
            TaskType::FileOperation => self.file_operation(spec, cancel).await,
        }
    }
}
