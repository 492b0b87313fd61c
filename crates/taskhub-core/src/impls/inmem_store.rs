//! In-memory TaskStore implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::domain::{Result, TaskError, TaskEvent, TaskId, TaskRecord, TaskType, Transition};
use crate::observability::TaskCounts;
use crate::ports::{Clock, EventSink, TaskFilter, TaskStore};

/// Default retention cap.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

type SharedRecord = Arc<Mutex<TaskRecord>>;

/// Which records exist, and in what order they were submitted.
struct StoreIndex {
    /// Every record sits behind its own lock.
    records: HashMap<TaskId, SharedRecord>,

    /// Submission order (TaskIds only), oldest first.
    order: VecDeque<TaskId>,
}

impl StoreIndex {
    /// Drop the oldest terminal records until we are back under `max_records`.
    /// Live records are never evicted.
    fn evict(&mut self, max_records: usize) -> usize {
        let mut evicted = 0;
        while self.records.len() > max_records {
            let Some(pos) = self.order.iter().position(|id| {
                self.records
                    .get(id)
                    .is_some_and(|record| record.lock().is_terminal())
            }) else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.records.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }

    fn lookup(&self, id: &TaskId) -> Result<SharedRecord> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }
}

/// In-memory store.
///
/// Design:
/// - The index (`RwLock`) only maps ids to records; each record has its own
///   `parking_lot::Mutex`. No critical section awaits.
/// - Lock order is index -> record. A record lock is never held while
///   taking the index lock.
/// - Events are published while that record's lock is held, so per-task
///   event order always equals transition order, while work on other
///   records proceeds in parallel.
pub struct InMemoryTaskStore {
    index: RwLock<StoreIndex>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    max_records: usize,
}

impl InMemoryTaskStore {
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self::with_max_records(sink, clock, DEFAULT_MAX_RECORDS)
    }

    pub fn with_max_records(
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        max_records: usize,
    ) -> Self {
        Self {
            index: RwLock::new(StoreIndex {
                records: HashMap::new(),
                order: VecDeque::new(),
            }),
            sink,
            clock,
            max_records: max_records.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.index.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, id: TaskId, task_type: TaskType) -> Result<TaskRecord> {
        let mut index = self.index.write();
        if index.records.contains_key(&id) {
            return Err(TaskError::DuplicateId(id));
        }

        let record = TaskRecord::new(id.clone(), task_type, self.clock.now());
        let shared = Arc::new(Mutex::new(record.clone()));
        index.records.insert(id.clone(), Arc::clone(&shared));
        index.order.push_back(id.clone());

        let evicted = index.evict(self.max_records);
        if evicted > 0 {
            debug!(evicted, "evicted terminal records");
        }

        // created は同じレコードの遷移イベントより必ず先に出す
        let guard = shared.lock();
        drop(index);
        self.sink.publish(TaskEvent::created(record.clone()));
        drop(guard);

        debug!(task_id = %id, %task_type, "record created");
        Ok(record)
    }

    async fn transition(&self, id: &TaskId, transition: Transition) -> Result<TaskRecord> {
        let shared = self.index.read().lookup(id)?;
        let mut record = shared.lock();

        let now = self.clock.now();
        let from = match record.apply(transition, now) {
            Ok(from) => from,
            Err(err) => {
                error!(task_id = %id, error = %err, "rejected state transition");
                return Err(err);
            }
        };

        let snapshot = record.clone();
        debug!(task_id = %id, from = %from, to = %snapshot.status, "state transition");
        self.sink
            .publish(TaskEvent::transitioned(from, now, snapshot.clone()));
        Ok(snapshot)
    }

    async fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        let shared = self.index.read().lookup(id)?;
        let record = shared.lock().clone();
        Ok(record)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let mut out: Vec<TaskRecord> = {
            let index = self.index.read();
            index
                .order
                .iter()
                .filter_map(|id| index.records.get(id))
                .map(|record| record.lock().clone())
                .filter(|record| filter.matches(record))
                .collect()
        };
        // stable sort: ties keep insertion order
        out.sort_by_key(|record| record.submitted_at);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn counts(&self) -> Result<TaskCounts> {
        let index = self.index.read();
        let mut counts = TaskCounts::default();
        for record in index.records.values() {
            counts.add(record.lock().status);
        }
        Ok(counts)
    }
}
