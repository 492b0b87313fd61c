//! Ports - 抽象化レイヤー
//!
//! 各 trait はコアと外部（保存先・購読者・タスク本体・時刻・ID）の境界です。
//! 実装は `impls` にあります。

pub mod clock;
pub mod event_sink;
pub mod executor;
pub mod id_generator;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::executor::TaskExecutor;
pub use self::id_generator::{IdGenerator, SequentialGenerator, UlidGenerator};
pub use self::task_store::{TaskFilter, TaskStore};
