//! Configuration loaded from `taskhub.toml`.
//!
//! Every field has a default, so an empty (or missing) file is valid.
//! `TASKHUB_WORKERS`, `TASKHUB_QUEUE_CAPACITY` and `TASKHUB_TASK_TIMEOUT_MS`
//! take precedence over the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OverflowPolicy;

pub const ENV_WORKERS: &str = "TASKHUB_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "TASKHUB_QUEUE_CAPACITY";
pub const ENV_TASK_TIMEOUT_MS: &str = "TASKHUB_TASK_TIMEOUT_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskhubConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Bounded queue size.
    pub queue_capacity: usize,
    /// Default per-task timeout.
    pub task_timeout_ms: u64,
    /// How long `cancel_task` waits for an in-flight task to stop.
    pub cancel_grace_ms: u64,
    /// Retention cap of the in-memory store.
    pub max_records: usize,
    pub bus: BusConfig,
    pub simulation: SimulationConfig,
}

impl Default for TaskhubConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 100,
            task_timeout_ms: 30_000,
            cancel_grace_ms: 1_000,
            max_records: 10_000,
            bus: BusConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub overflow_policy: OverflowPolicy,
    /// Per-subscriber buffer size.
    pub subscriber_buffer: usize,
    /// Events kept for replay subscribers.
    pub history_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            overflow_policy: OverflowPolicy::DropOldest,
            subscriber_buffer: 256,
            history_capacity: 256,
        }
    }
}

/// Parameters of the simulated task bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// `[min, max]` latency of a simulated HTTP call.
    pub http_delay_ms: [u64; 2],
    /// `[min, max]` latency of a simulated file operation.
    pub file_delay_ms: [u64; 2],
    /// Probability (0.0..=1.0) that an http/file body fails.
    pub failure_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            http_delay_ms: [50, 250],
            file_delay_ms: [10, 100],
            failure_probability: 0.0,
        }
    }
}

impl TaskhubConfig {
    /// Load from `path` if it exists (defaults otherwise), apply environment
    /// overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Override fields from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_WORKERS).filter(|v| !v.is_empty()) {
            self.workers = v
                .parse()
                .map_err(|_| invalid("workers", format!("{ENV_WORKERS}={v} is not a number")))?;
        }
        if let Some(v) = lookup(ENV_QUEUE_CAPACITY).filter(|v| !v.is_empty()) {
            self.queue_capacity = v.parse().map_err(|_| {
                invalid("queue_capacity", format!("{ENV_QUEUE_CAPACITY}={v} is not a number"))
            })?;
        }
        if let Some(v) = lookup(ENV_TASK_TIMEOUT_MS).filter(|v| !v.is_empty()) {
            self.task_timeout_ms = v.parse().map_err(|_| {
                invalid("task_timeout_ms", format!("{ENV_TASK_TIMEOUT_MS}={v} is not a number"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.task_timeout_ms == 0 {
            return Err(invalid("task_timeout_ms", "must be greater than zero"));
        }
        if self.max_records == 0 {
            return Err(invalid("max_records", "must be at least 1"));
        }
        if self.bus.subscriber_buffer == 0 {
            return Err(invalid("bus.subscriber_buffer", "must be at least 1"));
        }
        let [min, max] = self.simulation.http_delay_ms;
        if min > max {
            return Err(invalid("simulation.http_delay_ms", format!("min {min} > max {max}")));
        }
        let [min, max] = self.simulation.file_delay_ms;
        if min > max {
            return Err(invalid("simulation.file_delay_ms", format!("min {min} > max {max}")));
        }
        let p = self.simulation.failure_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(invalid(
                "simulation.failure_probability",
                format!("{p} is outside 0.0..=1.0"),
            ));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}
