//! TaskService - 投入・照会の境界
//!
//! 呼び出し側（HTTP 層や CLI）が触るのはこの型だけです。
//! - 投入は実行を待たない（キューが満杯なら即座に `Overloaded`）
//! - 照会は TaskStore の正本をそのまま返す
//! - 更新通知は UpdateBus の購読として返す

use std::sync::Arc;

use tracing::info;

use crate::app::worker_pool::{CancelOutcome, Pushed, WorkerPool};
use crate::domain::{Result, TaskError, TaskId, TaskRecord, TaskToCreate, Transition};
use crate::impls::{SubscribeOptions, Subscription, UpdateBus};
use crate::observability::{PoolStats, TaskCounts};
use crate::ports::{IdGenerator, TaskFilter, TaskStore};

pub struct TaskService {
    generator: Arc<dyn IdGenerator>,
    store: Arc<dyn TaskStore>,
    bus: UpdateBus,
    pool: WorkerPool,
}

impl TaskService {
    pub(crate) fn new(
        generator: Arc<dyn IdGenerator>,
        store: Arc<dyn TaskStore>,
        bus: UpdateBus,
        pool: WorkerPool,
    ) -> Self {
        Self {
            generator,
            store,
            bus,
            pool,
        }
    }

    /// Validate, register as Queued and enqueue. Returns as soon as the task
    /// is queued.
    pub async fn submit_task(&self, request: TaskToCreate) -> Result<TaskId> {
        self.submit(None, request).await
    }

    /// Same as [`submit_task`](Self::submit_task) with a caller-chosen id.
    pub async fn submit_task_with_id(&self, hint: &str, request: TaskToCreate) -> Result<TaskId> {
        self.submit(Some(hint), request).await
    }

    async fn submit(&self, hint: Option<&str>, request: TaskToCreate) -> Result<TaskId> {
        let spec = request.validate()?;
        let id = self.generator.generate(hint)?;

        // 先に枠を取る: 満杯ならレコードを作らずに断る
        // 予約した時点で cancel からも見える
        let slot = self.pool.try_reserve(id.clone()).map_err(|e| match e {
            TaskError::QueueFull { capacity } => TaskError::Overloaded { capacity },
            other => other,
        })?;
        self.store.create(id.clone(), spec.task_type).await?;

        let task_type = spec.task_type;
        match slot.push(spec) {
            Ok(Pushed::Queued) => info!(task_id = %id, %task_type, "task submitted"),
            Ok(Pushed::Cancelled) => {
                info!(task_id = %id, %task_type, "task submitted and cancelled before enqueue")
            }
            Err(e) => {
                // shutdown raced the submission: the record must not stay Queued
                self.store.transition(&id, Transition::Cancel).await?;
                return Err(e);
            }
        }
        Ok(id)
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<TaskRecord> {
        self.store.get(id).await
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        self.store.list(filter).await
    }

    /// Cancel a task.
    ///
    /// - terminal: returned unchanged
    /// - queued: Cancelled immediately, its body never runs
    /// - processing: the worker is signalled; returns once it has stopped,
    ///   or the latest record when the grace period runs out
    pub async fn cancel_task(&self, id: &TaskId) -> Result<TaskRecord> {
        let record = self.store.get(id).await?;
        if record.is_terminal() {
            return Ok(record);
        }

        match self.pool.cancel(id).await? {
            CancelOutcome::Removed => info!(task_id = %id, "cancelled before start"),
            CancelOutcome::Signalled { finished } => {
                info!(task_id = %id, finished, "cancelled while processing")
            }
            CancelOutcome::NotInPool => {}
        }
        self.store.get(id).await
    }

    /// Hot subscription: events from now on.
    pub fn stream_updates(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn stream_updates_with(&self, options: SubscribeOptions) -> Subscription {
        self.bus.subscribe_with(options)
    }

    pub async fn counts(&self) -> Result<TaskCounts> {
        self.store.counts().await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop accepting work, cancel queued tasks, wait for running ones, then
    /// end every subscription. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.bus.close_all();
    }
}
