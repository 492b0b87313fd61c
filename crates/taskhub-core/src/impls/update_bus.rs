//! UpdateBus - TaskEvent のマルチキャスト配送
//!
//! # 実装詳細
//! - 購読者ごとに独立したリングバッファ（`VecDeque`）+ `Notify`
//! - `publish` はレジストリのスナップショット（`Vec<Arc<Slot>>` の clone）に対して配る
//! - バッファが満杯の時は購読者ごとの OverflowPolicy を適用し、欠落数を Gap として通知
//! - publish は await しない（TaskStore のロック内から呼ばれる）
//!
//! # 購読モード
//! - Hot（デフォルト）: 購読した時点以降のイベントのみ
//! - Replay: 直近の履歴（`history_capacity` 件）を先に受け取り、その後ライブイベント

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::Stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::warn;

use crate::config::BusConfig;
use crate::domain::{OverflowPolicy, StreamItem, TaskEvent};
use crate::ports::EventSink;

/// Registration mode of a subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscribeMode {
    /// Only events published after subscribing.
    #[default]
    Hot,
    /// Retained history first, then live events.
    Replay,
}

/// Per-subscription overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub mode: SubscribeMode,
    /// Falls back to the bus default.
    pub policy: Option<OverflowPolicy>,
    /// Falls back to the bus default.
    pub buffer: Option<usize>,
}

impl SubscribeOptions {
    pub fn replay() -> Self {
        Self {
            mode: SubscribeMode::Replay,
            ..Self::default()
        }
    }

    pub fn policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn buffer(mut self, buffer: usize) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

/// Buffered entry: an event, or a marker for events lost at this position.
enum Entry {
    Event(TaskEvent),
    Gap(u64),
}

struct SlotBuffer {
    entries: VecDeque<Entry>,
    /// Number of `Entry::Event` in `entries` (gaps do not take capacity).
    events: usize,
    closed: bool,
}

impl SlotBuffer {
    /// Count one lost event after everything currently buffered.
    fn gap_at_back(&mut self) {
        match self.entries.back_mut() {
            Some(Entry::Gap(missed)) => *missed += 1,
            _ => self.entries.push_back(Entry::Gap(1)),
        }
    }

    /// Discard the oldest event; the loss is reported before everything
    /// still buffered.
    fn drop_oldest(&mut self) {
        let mut missed = 0;
        while let Some(entry) = self.entries.pop_front() {
            match entry {
                Entry::Gap(n) => missed += n,
                Entry::Event(_) => {
                    missed += 1;
                    self.events -= 1;
                    break;
                }
            }
        }
        self.entries.push_front(Entry::Gap(missed));
    }
}

/// One subscriber's buffer.
struct Slot {
    id: u64,
    policy: OverflowPolicy,
    capacity: usize,
    buffer: Mutex<SlotBuffer>,
    notify: Notify,
}

impl Slot {
    /// Push one event. Returns `true` if the slot must be unregistered.
    fn push(&self, event: &TaskEvent) -> bool {
        let mut buffer = self.buffer.lock();
        if buffer.closed {
            return false;
        }

        let mut disconnect = false;
        if buffer.events >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => buffer.drop_oldest(),
                // 捨てるのは新しい方なので、Gap は残っているイベントの後ろ
                OverflowPolicy::DropNewest => buffer.gap_at_back(),
                OverflowPolicy::Disconnect => {
                    buffer.gap_at_back();
                    buffer.closed = true;
                    disconnect = true;
                }
            }
        }
        if !disconnect && buffer.events < self.capacity {
            buffer.entries.push_back(Entry::Event(event.clone()));
            buffer.events += 1;
        }
        drop(buffer);
        self.notify.notify_one();
        disconnect
    }

    fn close(&self) {
        self.buffer.lock().closed = true;
        self.notify.notify_one();
    }

    /// Next item without waiting. `Ok(None)` means "nothing yet",
    /// `Err(())` means the stream is over.
    fn poll_item(&self) -> Result<Option<StreamItem>, ()> {
        let mut buffer = self.buffer.lock();
        // closed でも残りはバッファ順に配ってから終端
        match buffer.entries.pop_front() {
            Some(Entry::Event(event)) => {
                buffer.events -= 1;
                Ok(Some(StreamItem::Event(event)))
            }
            Some(Entry::Gap(missed)) => Ok(Some(StreamItem::Gap {
                missed,
                policy: self.policy,
            })),
            None if buffer.closed => Err(()),
            None => Ok(None),
        }
    }
}

struct BusInner {
    subscribers: RwLock<Vec<Arc<Slot>>>,
    history: Mutex<VecDeque<TaskEvent>>,
    config: BusConfig,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl BusInner {
    fn unregister(&self, ids: &[u64]) {
        self.subscribers
            .write()
            .retain(|slot| !ids.contains(&slot.id));
    }
}

/// Multicast of TaskEvents to any number of subscribers.
///
/// # 使用例
/// ```ignore
/// let bus = UpdateBus::new(BusConfig::default());
/// let mut sub = bus.subscribe();
/// bus.publish(event);
/// let item = sub.recv().await;
/// ```
#[derive(Clone)]
pub struct UpdateBus {
    inner: Arc<BusInner>,
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl UpdateBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                history: Mutex::new(VecDeque::new()),
                config,
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Hot subscription with the bus defaults.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(SubscribeOptions::default())
    }

    pub fn subscribe_with(&self, options: SubscribeOptions) -> Subscription {
        let config = &self.inner.config;
        let capacity = options.buffer.unwrap_or(config.subscriber_buffer).max(1);
        let slot = Arc::new(Slot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            policy: options.policy.unwrap_or(config.overflow_policy),
            capacity,
            buffer: Mutex::new(SlotBuffer {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                events: 0,
                closed: false,
            }),
            notify: Notify::new(),
        });

        // lock order: subscribers -> history (publish も同じ順序)
        let mut subscribers = self.inner.subscribers.write();
        if options.mode == SubscribeMode::Replay {
            let history = self.inner.history.lock();
            let skip = history.len().saturating_sub(capacity);
            let mut buffer = slot.buffer.lock();
            buffer
                .entries
                .extend(history.iter().skip(skip).cloned().map(Entry::Event));
            buffer.events = buffer.entries.len();
        }
        subscribers.push(Arc::clone(&slot));
        drop(subscribers);

        Subscription {
            slot,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver to every current subscriber. Never blocks on a subscriber.
    pub fn publish(&self, event: TaskEvent) {
        let snapshot: Vec<Arc<Slot>> = {
            let subscribers = self.inner.subscribers.read();
            let capacity = self.inner.config.history_capacity;
            if capacity > 0 {
                let mut history = self.inner.history.lock();
                if history.len() >= capacity {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
            subscribers.clone()
        };
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut disconnected = Vec::new();
        for slot in &snapshot {
            if slot.push(&event) {
                warn!(subscriber = slot.id, capacity = slot.capacity, "subscriber overflowed, disconnecting");
                disconnected.push(slot.id);
            }
        }
        if !disconnected.is_empty() {
            self.inner.unregister(&disconnected);
        }
    }

    /// End every subscription (after their buffered items are drained).
    pub fn close_all(&self) {
        let slots = std::mem::take(&mut *self.inner.subscribers.write());
        for slot in slots {
            slot.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Total number of events published so far.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

impl EventSink for UpdateBus {
    fn publish(&self, event: TaskEvent) {
        UpdateBus::publish(self, event);
    }
}

/// A subscriber's handle. Dropping it unregisters the subscriber.
pub struct Subscription {
    slot: Arc<Slot>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next item. `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        loop {
            match self.slot.poll_item() {
                Ok(Some(item)) => return Some(item),
                Ok(None) => {}
                Err(()) => return None,
            }
            // publish 側は notify_one なので、ここで待つ前に来た通知も permit として残る
            self.slot.notify.notified().await;
        }
    }

    /// Next item if one is buffered.
    pub fn try_recv(&mut self) -> Option<StreamItem> {
        self.slot.poll_item().ok().flatten()
    }

    /// Wait for the next *event*, skipping gap markers.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        loop {
            match self.recv().await? {
                StreamItem::Event(event) => return Some(event),
                StreamItem::Gap { .. } => continue,
            }
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.slot.policy
    }

    pub fn is_closed(&self) -> bool {
        self.slot.buffer.lock().closed
    }

    /// Lazy `Stream` view of this subscription.
    pub fn into_stream(self) -> impl Stream<Item = StreamItem> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let item = sub.recv().await?;
            Some((item, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(&[self.slot.id]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskRecord, TaskStatus, TaskType};
    use chrono::Utc;
    use futures::StreamExt;
    use std::time::Duration;

    fn event(n: usize) -> TaskEvent {
        TaskEvent::created(TaskRecord::new(
            TaskId::new(format!("t{n}")),
            TaskType::Delay,
            Utc::now(),
        ))
    }

    fn bus(policy: OverflowPolicy, buffer: usize) -> UpdateBus {
        UpdateBus::new(BusConfig {
            overflow_policy: policy,
            subscriber_buffer: buffer,
            history_capacity: 8,
        })
    }

    fn ids(items: &[StreamItem]) -> Vec<String> {
        items
            .iter()
            .map(|item| match item {
                StreamItem::Event(e) => e.task_id.to_string(),
                StreamItem::Gap { missed, .. } => format!("gap{missed}"),
            })
            .collect()
    }

    fn drain(sub: &mut Subscription) -> Vec<StreamItem> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let bus = UpdateBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(event(1));
        bus.publish(event(2));

        assert_eq!(ids(&drain(&mut a)), vec!["t1", "t2"]);
        assert_eq!(ids(&drain(&mut b)), vec!["t1", "t2"]);
        assert_eq!(bus.published_count(), 2);
    }

    #[tokio::test]
    async fn hot_subscription_starts_now() {
        let bus = UpdateBus::default();
        bus.publish(event(1));
        let mut sub = bus.subscribe();
        bus.publish(event(2));
        assert_eq!(ids(&drain(&mut sub)), vec!["t2"]);
    }

    #[tokio::test]
    async fn replay_subscription_gets_history_first() {
        let bus = bus(OverflowPolicy::DropOldest, 16);
        for n in 0..10 {
            bus.publish(event(n));
        }
        let mut sub = bus.subscribe_with(SubscribeOptions::replay());
        bus.publish(event(10));

        let got = ids(&drain(&mut sub));
        // history_capacity = 8
        assert_eq!(got.first().map(String::as_str), Some("t2"));
        assert_eq!(got.last().map(String::as_str), Some("t10"));
        assert_eq!(got.len(), 9);
    }

    #[tokio::test]
    async fn drop_oldest_reports_gap_then_newest_events() {
        let bus = bus(OverflowPolicy::DropOldest, 2);
        let mut sub = bus.subscribe();
        for n in 1..=5 {
            bus.publish(event(n));
        }
        assert_eq!(ids(&drain(&mut sub)), vec!["gap3", "t4", "t5"]);
    }

    #[tokio::test]
    async fn drop_newest_reports_gap_after_kept_events() {
        let bus = bus(OverflowPolicy::DropNewest, 2);
        let mut sub = bus.subscribe();
        for n in 1..=5 {
            bus.publish(event(n));
        }
        let items = drain(&mut sub);
        assert_eq!(ids(&items), vec!["t1", "t2", "gap3"]);
        assert!(matches!(
            items[2],
            StreamItem::Gap {
                policy: OverflowPolicy::DropNewest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn drop_newest_gap_sits_between_old_and_later_events() {
        let bus = bus(OverflowPolicy::DropNewest, 2);
        let mut sub = bus.subscribe();
        for n in 1..=4 {
            bus.publish(event(n));
        }
        // frees one place: t5 is accepted behind the gap for t3, t4
        assert_eq!(ids(&[sub.try_recv().unwrap()]), vec!["t1"]);
        bus.publish(event(5));
        bus.publish(event(6));

        assert_eq!(ids(&drain(&mut sub)), vec!["t2", "gap2", "t5", "gap1"]);
    }

    #[tokio::test]
    async fn drop_oldest_merges_consecutive_losses() {
        let bus = bus(OverflowPolicy::DropOldest, 2);
        let mut sub = bus.subscribe();
        for n in 1..=3 {
            bus.publish(event(n));
        }
        assert_eq!(ids(&[sub.try_recv().unwrap()]), vec!["gap1"]);
        for n in 4..=6 {
            bus.publish(event(n));
        }
        assert_eq!(ids(&drain(&mut sub)), vec!["gap3", "t5", "t6"]);
    }

    #[tokio::test]
    async fn disconnect_delivers_buffer_then_gap_then_ends() {
        let bus = bus(OverflowPolicy::Disconnect, 2);
        let mut sub = bus.subscribe();
        for n in 1..=4 {
            bus.publish(event(n));
        }
        assert_eq!(bus.subscriber_count(), 0);
        assert!(sub.is_closed());

        assert_eq!(ids(&[sub.recv().await.unwrap()]), vec!["t1"]);
        assert_eq!(ids(&[sub.recv().await.unwrap()]), vec!["t2"]);
        assert_eq!(ids(&[sub.recv().await.unwrap()]), vec!["gap1"]);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_fast_one() {
        let bus = bus(OverflowPolicy::DropOldest, 1);
        let _slow = bus.subscribe();
        let mut fast = bus.subscribe_with(SubscribeOptions::default().buffer(64));

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for n in 0..50 {
                    bus.publish(event(n));
                }
            })
        };
        tokio::time::timeout(Duration::from_secs(1), publisher)
            .await
            .unwrap()
            .unwrap();

        let mut received = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(50), fast.next_event()).await
        {
            received += 1;
        }
        assert_eq!(received, 50);
    }

    #[tokio::test]
    async fn recv_waits_for_publish() {
        let bus = UpdateBus::default();
        let mut sub = bus.subscribe();
        let waiter = tokio::spawn(async move { sub.next_event().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(event(7));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.task_id, TaskId::new("t7"));
        assert_eq!(got.new_status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let bus = UpdateBus::default();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_all_ends_streams() {
        let bus = UpdateBus::default();
        let stream = bus.subscribe().into_stream();
        bus.publish(event(1));
        bus.close_all();

        let items: Vec<_> = stream.collect().await;
        assert_eq!(ids(&items), vec!["t1"]);
    }
}
