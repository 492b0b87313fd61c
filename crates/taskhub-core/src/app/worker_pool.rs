//! WorkerPool - 固定数のワーカー + 有界キュー
//!
//! # フロー（ワーカー 1 本あたり）
//! 1. キューから 1 件取り出す（空なら待つ。ワーカー内で待つのはここだけ）
//! 2. CancellationToken を in-flight レジストリに登録（取り出しと同じロック内）
//! 3. TaskStore::transition(Start) で Processing へ
//! 4. 本体を別タスクで実行し、タイムアウト・キャンセルと競合させる
//! 5. 結果に応じて Completed / Failed / Cancelled へ遷移
//!
//! # 設計
//! - キューとレジストリは 1 つの `parking_lot::Mutex` で守る（await を跨がない）
//! - 満杯なら `QueueFull` を同期的に返す（呼び出し側をブロックしない）
//! - 本体のエラー・panic・タイムアウトはワーカー境界で TaskRecord に変換する
//!   （ワーカーもプールも落ちない）

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{FailureKind, Result, TaskError, TaskId, TaskSpec, Transition};
use crate::observability::{PoolStats, WorkerSlotState};
use crate::ports::{TaskExecutor, TaskStore};

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub workers: usize,
    pub capacity: usize,
    /// Default per-task timeout.
    pub task_timeout: Duration,
    /// How long `cancel` waits for an in-flight task to stop.
    pub cancel_grace: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 100,
            task_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(1),
        }
    }
}

/// Result of [`WorkerPool::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Was still queued: removed and marked Cancelled.
    Removed,
    /// Was running: the worker was signalled. `finished` is false if it did
    /// not stop within the grace period.
    Signalled { finished: bool },
    /// The pool does not hold this task (unknown, or already finished).
    NotInPool,
}

struct QueueItem {
    id: TaskId,
    spec: TaskSpec,
}

struct InFlight {
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

struct PoolState {
    queue: VecDeque<QueueItem>,
    /// Places handed out by `try_reserve` but not yet pushed, keyed by task.
    /// `true` once the task was cancelled before its push.
    reserved: HashMap<TaskId, bool>,
    in_flight: HashMap<TaskId, InFlight>,
    slots: Vec<WorkerSlotState>,
    accepting: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    notify: Notify,
    options: PoolOptions,
    store: Arc<dyn TaskStore>,
    executor: Arc<dyn TaskExecutor>,
}

impl PoolShared {
    fn set_slot(&self, worker: usize, slot: WorkerSlotState) {
        if let Some(s) = self.state.lock().slots.get_mut(worker) {
            *s = slot;
        }
    }
}

/// Result of [`QueueSlot::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// The task was cancelled while holding the reservation; nothing was
    /// enqueued and the record is already Cancelled.
    Cancelled,
}

/// A queue place reserved for one task.
///
/// Dropping it without calling [`QueueSlot::push`] gives the place back.
pub struct QueueSlot {
    shared: Option<Arc<PoolShared>>,
    id: TaskId,
}

impl QueueSlot {
    /// Enqueue into the reserved place and wake a worker.
    ///
    /// Fails with `ShuttingDown` if shutdown started after the reservation.
    pub fn push(mut self, spec: TaskSpec) -> Result<Pushed> {
        let Some(shared) = self.shared.take() else {
            return Err(TaskError::ShuttingDown);
        };
        let id = self.id.clone();
        {
            let mut state = shared.state.lock();
            // cancel が予約中に届いていたら積まない
            if state.reserved.remove(&id) == Some(true) {
                debug!(task_id = %id, "reservation was cancelled, not enqueued");
                return Ok(Pushed::Cancelled);
            }
            if !state.accepting {
                return Err(TaskError::ShuttingDown);
            }
            state.queue.push_back(QueueItem { id, spec });
        }
        shared.notify.notify_one();
        Ok(Pushed::Queued)
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.state.lock().reserved.remove(&self.id);
        }
    }
}

/// Worker pool handle.
/// - `shutdown()` で受付を止め、キュー上のタスクをキャンセルし、全ワーカーの終了を待つ
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    /// Set once every worker has exited.
    stopped: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `options.workers` workers. Must be called inside a tokio runtime.
    pub fn spawn(
        options: PoolOptions,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let workers = options.workers.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(options.capacity.min(1024)),
                reserved: HashMap::new(),
                in_flight: HashMap::new(),
                slots: vec![WorkerSlotState::Idle; workers],
                accepting: true,
            }),
            notify: Notify::new(),
            options: PoolOptions { workers, ..options },
            store,
            executor,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(workers);
        for worker in 0..workers {
            let shared = Arc::clone(&shared);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker, shared, rx)));
        }
        info!(workers, capacity = options.capacity, "worker pool started");

        Self {
            shared,
            shutdown_tx,
            joins: Mutex::new(joins),
            stopped: watch::channel(false).0,
        }
    }

    pub fn options(&self) -> PoolOptions {
        self.shared.options
    }

    /// Reserve one queue place for `id` without blocking.
    ///
    /// From here on the task is visible to [`cancel`](Self::cancel).
    pub fn try_reserve(&self, id: TaskId) -> Result<QueueSlot> {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return Err(TaskError::ShuttingDown);
        }
        let capacity = self.shared.options.capacity;
        if state.queue.len() + state.reserved.len() >= capacity {
            return Err(TaskError::QueueFull { capacity });
        }
        if state.reserved.contains_key(&id) {
            return Err(TaskError::DuplicateId(id));
        }
        state.reserved.insert(id.clone(), false);
        Ok(QueueSlot {
            shared: Some(Arc::clone(&self.shared)),
            id,
        })
    }

    /// Enqueue without blocking; `QueueFull` when there is no room.
    pub fn submit(&self, id: TaskId, spec: TaskSpec) -> Result<()> {
        self.try_reserve(id)?.push(spec).map(|_| ())
    }

    /// Cancel a queued or running task.
    pub async fn cancel(&self, id: &TaskId) -> Result<CancelOutcome> {
        enum Found {
            Queued,
            Reserved,
            Running(watch::Receiver<bool>),
            Nothing,
        }

        let found = {
            let mut state = self.shared.state.lock();
            if let Some(pos) = state.queue.iter().position(|item| &item.id == id) {
                state.queue.remove(pos);
                Found::Queued
            } else if let Some(entry) = state.in_flight.get(id) {
                entry.token.cancel();
                Found::Running(entry.done.clone())
            } else if let Some(cancelled) = state.reserved.get_mut(id) {
                // 予約済みで push 前: push 側が印を見て積まずに終わる
                *cancelled = true;
                Found::Reserved
            } else {
                Found::Nothing
            }
        };

        match found {
            Found::Queued => {
                self.shared.store.transition(id, Transition::Cancel).await?;
                info!(task_id = %id, "queued task cancelled");
                Ok(CancelOutcome::Removed)
            }
            Found::Reserved => {
                if let Err(e) = self.shared.store.transition(id, Transition::Cancel).await {
                    if let Some(cancelled) = self.shared.state.lock().reserved.get_mut(id) {
                        *cancelled = false;
                    }
                    return Err(e);
                }
                info!(task_id = %id, "reserved task cancelled before enqueue");
                Ok(CancelOutcome::Removed)
            }
            Found::Running(mut done) => {
                debug!(task_id = %id, "cancellation signalled to worker");
                let grace = self.shared.options.cancel_grace;
                let finished = matches!(
                    tokio::time::timeout(grace, done.wait_for(|finished| *finished)).await,
                    Ok(Ok(_))
                );
                if !finished {
                    warn!(task_id = %id, grace_ms = grace.as_millis() as u64, "worker did not stop within grace period");
                }
                Ok(CancelOutcome::Signalled { finished })
            }
            Found::Nothing => Ok(CancelOutcome::NotInPool),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            workers: state.slots.len(),
            busy: state
                .slots
                .iter()
                .filter(|s| **s != WorkerSlotState::Idle)
                .count(),
            queued: state.queue.len(),
            capacity: self.shared.options.capacity,
            slots: state.slots.clone(),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Stop accepting, cancel queued tasks, let in-flight tasks finish (or
    /// time out), and wait for every worker to exit. Idempotent; concurrent
    /// callers all return after the workers have exited.
    pub async fn shutdown(&self) {
        let drained: Vec<QueueItem> = {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            state.queue.drain(..).collect()
        };
        for item in drained {
            if let Err(e) = self.shared.store.transition(&item.id, Transition::Cancel).await {
                error!(task_id = %item.id, error = %e, "failed to cancel queued task during shutdown");
            }
        }

        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
        self.shared.notify.notify_waiters();

        let joins = std::mem::take(&mut *self.joins.lock());
        if joins.is_empty() {
            // another caller owns the joins
            let mut stopped = self.stopped.subscribe();
            let _ = stopped.wait_for(|stopped| *stopped).await;
            return;
        }
        for join in joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker exited abnormally");
            }
        }
        self.stopped.send_replace(true);
        info!("worker pool stopped");
    }
}

type Dequeued = (QueueItem, CancellationToken, watch::Sender<bool>);

async fn worker_loop(worker: usize, shared: Arc<PoolShared>, mut shutdown_rx: watch::Receiver<bool>) {
    while let Some((item, token, done_tx)) = next_item(worker, &shared, &mut shutdown_rx).await {
        debug!(worker, task_id = %item.id, "dequeued");
        run_item(worker, &shared, &item, token).await;

        {
            let mut state = shared.state.lock();
            state.in_flight.remove(&item.id);
            state.slots[worker] = WorkerSlotState::Idle;
        }
        let _ = done_tx.send(true);
    }
    debug!(worker, "worker exiting");
}

/// Wait for the next queued item. `None` once the pool is shut down and the
/// queue is empty.
async fn next_item(
    worker: usize,
    shared: &PoolShared,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<Dequeued> {
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        // 先に waiter 登録しておけば、確認〜待機の間の notify を取りこぼさない
        notified.as_mut().enable();

        {
            let mut state = shared.state.lock();
            if let Some(item) = state.queue.pop_front() {
                // 取り出しと登録は同じロック内: cancel から見えない瞬間を作らない
                let token = CancellationToken::new();
                let (done_tx, done_rx) = watch::channel(false);
                state.in_flight.insert(
                    item.id.clone(),
                    InFlight {
                        token: token.clone(),
                        done: done_rx,
                    },
                );
                state.slots[worker] = WorkerSlotState::Dequeued;
                return Some((item, token, done_tx));
            }
            if !state.accepting {
                return None;
            }
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // pool handle dropped without shutdown()
                if changed.is_err() {
                    return None;
                }
            }
            _ = &mut notified => {}
        }
    }
}

async fn run_item(worker: usize, shared: &PoolShared, item: &QueueItem, token: CancellationToken) {
    let id = &item.id;
    let store = &shared.store;

    // 取り出し直後にキャンセル済みなら実行しない
    if token.is_cancelled() {
        if let Err(e) = store.transition(id, Transition::Cancel).await {
            error!(worker, task_id = %id, error = %e, "failed to cancel dequeued task");
        }
        return;
    }

    if let Err(e) = store.transition(id, Transition::Start).await {
        error!(worker, task_id = %id, error = %e, "failed to start task");
        return;
    }
    shared.set_slot(worker, WorkerSlotState::Executing);

    let timeout = item.spec.timeout.unwrap_or(shared.options.task_timeout);
    let mut body = {
        let executor = Arc::clone(&shared.executor);
        let id = id.clone();
        let spec = item.spec.clone();
        let token = token.clone();
        tokio::spawn(async move { executor.execute(&id, &spec, &token).await })
    };

    let transition = tokio::select! {
        biased;
        _ = token.cancelled() => {
            body.abort();
            info!(worker, task_id = %id, "task cancelled while running");
            Transition::Cancel
        }
        joined = &mut body => body_outcome(worker, id, joined),
        _ = tokio::time::sleep(timeout) => {
            body.abort();
            warn!(worker, task_id = %id, timeout_ms = timeout.as_millis() as u64, "task timed out");
            Transition::Fail {
                error: TaskError::Timeout(timeout).to_string(),
                kind: FailureKind::Timeout,
            }
        }
    };

    match store.transition(id, transition).await {
        Ok(record) => debug!(worker, task_id = %id, status = %record.status, "task finished"),
        Err(e) => error!(worker, task_id = %id, error = %e, "failed to record task outcome"),
    }
}

fn body_outcome(
    worker: usize,
    id: &TaskId,
    joined: std::result::Result<Result<String>, JoinError>,
) -> Transition {
    match joined {
        Ok(Ok(result)) => {
            info!(worker, task_id = %id, "task completed");
            Transition::Complete(result)
        }
        Ok(Err(e)) => {
            warn!(worker, task_id = %id, error = %e, "task failed");
            Transition::Fail {
                error: e.to_string(),
                kind: FailureKind::ExecutionFault,
            }
        }
        Err(join) => {
            let error = if join.is_panic() {
                let panic = join.into_panic();
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("task body panicked: {msg}")
            } else {
                "task body was aborted".to_string()
            };
            warn!(worker, task_id = %id, error = %error, "task body crashed");
            Transition::Fail {
                error,
                kind: FailureKind::ExecutionFault,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskRecord, TaskStatus, TaskToCreate};
    use crate::impls::{InMemoryTaskStore, SimulatedExecutor};
    use crate::ports::{NoopEventSink, SystemClock};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sleeps for the requested duration, tracks concurrency, panics on "boom".
    #[derive(Default)]
    struct RecordingExecutor {
        running: AtomicUsize,
        max_running: AtomicUsize,
        calls: Mutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute(&self, id: &TaskId, spec: &TaskSpec, _cancel: &CancellationToken) -> Result<String> {
            self.calls.lock().push(id.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(spec.duration).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if spec.payload_str("mode") == Some("boom") {
                panic!("boom");
            }
            Ok(format!("ran {id}"))
        }
    }

    struct Harness {
        store: Arc<InMemoryTaskStore>,
        pool: WorkerPool,
    }

    impl Harness {
        fn new(options: PoolOptions, executor: Arc<dyn TaskExecutor>) -> Self {
            let store = Arc::new(InMemoryTaskStore::new(
                Arc::new(NoopEventSink),
                Arc::new(SystemClock),
            ));
            let pool = WorkerPool::spawn(options, store.clone(), executor);
            Self { store, pool }
        }

        async fn submit(&self, name: &str, req: TaskToCreate) -> Result<TaskId> {
            let id = TaskId::new(name);
            let spec = req.validate()?;
            let slot = self.pool.try_reserve(id.clone())?;
            self.store.create(id.clone(), spec.task_type).await?;
            slot.push(spec)?;
            Ok(id)
        }

        async fn wait_terminal(&self, id: &TaskId) -> TaskRecord {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let record = self.store.get(id).await.unwrap();
                    if record.is_terminal() {
                        return record;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("task did not finish")
        }
    }

    fn options(workers: usize, capacity: usize) -> PoolOptions {
        PoolOptions {
            workers,
            capacity,
            task_timeout: Duration::from_secs(2),
            cancel_grace: Duration::from_secs(1),
        }
    }

    fn delay_ms(ms: u64) -> TaskToCreate {
        TaskToCreate::delay(Duration::from_millis(ms))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_task_to_completion() {
        let h = Harness::new(options(1, 4), Arc::new(SimulatedExecutor::default()));
        let id = h.submit("a", delay_ms(10)).await.unwrap();
        let record = h.wait_terminal(&id).await;
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.result.is_some());
        assert!(record.started_at.is_some() && record.finished_at.is_some());
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let h = Harness::new(options(1, 2), Arc::new(RecordingExecutor::default()));
        // worker は 1 本なので 1 件は実行中、残りがキューに溜まる
        h.submit("running", delay_ms(500)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.submit("q1", delay_ms(10)).await.unwrap();
        h.submit("q2", delay_ms(10)).await.unwrap();

        let err = h.submit("q3", delay_ms(10)).await.unwrap_err();
        assert_eq!(err, TaskError::QueueFull { capacity: 2 });
        // rejected before the record was created
        assert!(matches!(
            h.store.get(&TaskId::new("q3")).await,
            Err(TaskError::NotFound(_))
        ));
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_reservation_frees_the_place() {
        let h = Harness::new(options(1, 1), Arc::new(RecordingExecutor::default()));
        let slot = h.pool.try_reserve(TaskId::new("a")).unwrap();
        assert!(matches!(
            h.pool.try_reserve(TaskId::new("b")),
            Err(TaskError::QueueFull { .. })
        ));
        drop(slot);
        assert!(h.pool.try_reserve(TaskId::new("b")).is_ok());
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn same_id_cannot_be_reserved_twice() {
        let h = Harness::new(options(1, 4), Arc::new(RecordingExecutor::default()));
        let _slot = h.pool.try_reserve(TaskId::new("a")).unwrap();
        assert_eq!(
            h.pool.try_reserve(TaskId::new("a")).err(),
            Some(TaskError::DuplicateId(TaskId::new("a")))
        );
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_between_reserve_and_push_keeps_task_out_of_queue() {
        let exec = Arc::new(RecordingExecutor::default());
        let h = Harness::new(options(1, 4), exec.clone());
        let id = TaskId::new("reserved");
        let spec = delay_ms(1).validate().unwrap();
        let slot = h.pool.try_reserve(id.clone()).unwrap();
        h.store.create(id.clone(), spec.task_type).await.unwrap();

        assert_eq!(h.pool.cancel(&id).await.unwrap(), CancelOutcome::Removed);
        assert_eq!(h.store.get(&id).await.unwrap().status, TaskStatus::Cancelled);

        assert_eq!(slot.push(spec).unwrap(), Pushed::Cancelled);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(exec.calls.lock().is_empty());
        assert_eq!(h.pool.stats().queued, 0);
        // the place was given back
        assert!(h.pool.try_reserve(id).is_ok());
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_queued_task_removes_it() {
        let exec = Arc::new(RecordingExecutor::default());
        let h = Harness::new(options(1, 4), exec.clone());
        let blocker = h.submit("blocker", delay_ms(100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = h.submit("queued", delay_ms(10)).await.unwrap();

        let outcome = h.pool.cancel(&queued).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Removed);
        assert_eq!(h.store.get(&queued).await.unwrap().status, TaskStatus::Cancelled);

        h.wait_terminal(&blocker).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!exec.calls.lock().contains(&queued));
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_running_task_stops_it() {
        let h = Harness::new(options(1, 4), Arc::new(SimulatedExecutor::default()));
        let id = h.submit("long", delay_ms(10_000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.store.get(&id).await.unwrap().status, TaskStatus::Processing);

        let outcome = h.pool.cancel(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Signalled { finished: true });
        let record = h.store.get(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none() && record.error.is_none());

        assert_eq!(h.pool.cancel(&id).await.unwrap(), CancelOutcome::NotInPool);
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn slow_body_times_out() {
        let mut opts = options(1, 4);
        opts.task_timeout = Duration::from_millis(50);
        let h = Harness::new(opts, Arc::new(SimulatedExecutor::default()));
        let id = h.submit("slow", delay_ms(5_000)).await.unwrap();

        let record = h.wait_terminal(&id).await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_kind, Some(FailureKind::Timeout));
        assert_eq!(record.error.as_deref(), Some("timed out after 50ms"));
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn per_task_timeout_overrides_default() {
        let h = Harness::new(options(1, 4), Arc::new(SimulatedExecutor::default()));
        let req = delay_ms(5_000).with_timeout(Duration::from_millis(30));
        let id = h.submit("short-timeout", req).await.unwrap();
        let record = h.wait_terminal(&id).await;
        assert_eq!(record.error_kind, Some(FailureKind::Timeout));
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_body_fails_task_but_not_worker() {
        let h = Harness::new(options(1, 4), Arc::new(RecordingExecutor::default()));
        let bad = h
            .submit(
                "bad",
                delay_ms(1).with_payload(serde_json::json!({"mode": "boom"})),
            )
            .await
            .unwrap();
        let good = h.submit("good", delay_ms(1)).await.unwrap();

        let record = h.wait_terminal(&bad).await;
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_kind, Some(FailureKind::ExecutionFault));
        assert!(record.error.unwrap().contains("boom"));

        assert_eq!(h.wait_terminal(&good).await.status, TaskStatus::Completed);
        h.pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_than_pool_size() {
        let exec = Arc::new(RecordingExecutor::default());
        let h = Harness::new(options(3, 32), exec.clone());
        let mut ids = Vec::new();
        for n in 0..12 {
            ids.push(h.submit(&format!("t{n}"), delay_ms(20)).await.unwrap());
        }
        for id in &ids {
            assert_eq!(h.wait_terminal(id).await.status, TaskStatus::Completed);
        }
        assert!(exec.max_running.load(Ordering::SeqCst) <= 3);
        assert_eq!(exec.calls.lock().len(), 12);
        h.pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_and_finishes_running() {
        let h = Harness::new(options(1, 4), Arc::new(SimulatedExecutor::default()));
        let running = h.submit("running", delay_ms(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = h.submit("queued", delay_ms(50)).await.unwrap();

        h.pool.shutdown().await;

        assert_eq!(h.store.get(&running).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(h.store.get(&queued).await.unwrap().status, TaskStatus::Cancelled);
        assert!(!h.pool.is_accepting());
        assert_eq!(
            h.pool.submit(TaskId::new("late"), delay_ms(1).validate().unwrap()),
            Err(TaskError::ShuttingDown)
        );
        // idempotent
        h.pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_shutdowns_both_wait_for_workers() {
        let h = Harness::new(options(1, 4), Arc::new(SimulatedExecutor::default()));
        let running = h.submit("running", delay_ms(100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = async {
            h.pool.shutdown().await;
            h.store.get(&running).await.unwrap().status
        };
        let second = async {
            h.pool.shutdown().await;
            h.store.get(&running).await.unwrap().status
        };
        let (a, b) = tokio::join!(first, second);

        assert_eq!(a, TaskStatus::Completed);
        assert_eq!(b, TaskStatus::Completed);
        assert_eq!(h.pool.stats().busy, 0);
    }

    #[tokio::test]
    async fn stats_reflect_busy_workers() {
        let h = Harness::new(options(2, 4), Arc::new(SimulatedExecutor::default()));
        assert_eq!(h.pool.stats().busy, 0);
        h.submit("a", delay_ms(200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = h.pool.stats();
        assert_eq!(stats.workers, 2);
        assert_eq!(stats.busy, 1);
        assert!(stats.slots.contains(&WorkerSlotState::Executing));
        h.pool.shutdown().await;
    }
}
