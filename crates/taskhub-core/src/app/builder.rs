//! ServiceBuilder - TaskService の構築とワイヤリング
//!
//! # 方針
//! - 設定は build() 時に検証する（Fail-fast）
//! - テスト用に ID 生成器・時計・タスク本体を差し替えられる
//! - build() はワーカーを spawn するので tokio ランタイム内で呼ぶ

use std::sync::Arc;

use crate::app::service::TaskService;
use crate::app::worker_pool::{PoolOptions, WorkerPool};
use crate::config::{ConfigError, TaskhubConfig};
use crate::impls::{InMemoryTaskStore, SimulatedExecutor, UpdateBus};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskExecutor, UlidGenerator};

/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new(TaskhubConfig::load("taskhub.toml")?)
///     .build()?;
/// let id = service.submit_task(TaskToCreate::new("delay", 100)).await?;
/// ```
pub struct ServiceBuilder {
    config: TaskhubConfig,
    generator: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
    executor: Option<Arc<dyn TaskExecutor>>,
}

/// Startup failure.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("no tokio runtime: ServiceBuilder::build must be called from within a runtime")]
    NoRuntime,
}

impl ServiceBuilder {
    pub fn new(config: TaskhubConfig) -> Self {
        Self {
            config,
            generator: None,
            clock: None,
            executor: None,
        }
    }

    pub fn with_id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<TaskService, BuildError> {
        self.config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SimulatedExecutor::new(config.simulation.clone())));

        let bus = UpdateBus::new(config.bus.clone());
        let store = Arc::new(InMemoryTaskStore::with_max_records(
            Arc::new(bus.clone()),
            clock,
            config.max_records,
        ));
        let pool = WorkerPool::spawn(
            PoolOptions {
                workers: config.workers,
                capacity: config.queue_capacity,
                task_timeout: config.task_timeout(),
                cancel_grace: config.cancel_grace(),
            },
            store.clone(),
            executor,
        );

        Ok(TaskService::new(generator, store, bus, pool))
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new(TaskhubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskToCreate;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn build_with_defaults() {
        let service = ServiceBuilder::default().build().unwrap();
        let stats = service.pool_stats();
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.capacity, 100);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let config = TaskhubConfig {
            queue_capacity: 0,
            ..TaskhubConfig::default()
        };
        let err = ServiceBuilder::new(config).build().err().unwrap();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::Invalid { key: "queue_capacity", .. })
        ));
    }

    #[test]
    fn build_outside_runtime_fails_fast() {
        let err = ServiceBuilder::default().build().err().unwrap();
        assert!(matches!(err, BuildError::NoRuntime));
    }

    #[tokio::test]
    async fn clock_override_feeds_ids_and_records() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let service = ServiceBuilder::default()
            .with_clock(Arc::new(FixedClock::new(t)))
            .build()
            .unwrap();
        let id = service
            .submit_task(TaskToCreate::new("delay", 1))
            .await
            .unwrap();
        assert!(id.as_str().starts_with("task-"));
        assert_eq!(service.get_task(&id).await.unwrap().submitted_at, t);
        service.shutdown().await;
    }
}
