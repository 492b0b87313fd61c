//! taskhub-core
//!
//! In-process asynchronous task processing: submit work, run it on a fixed
//! pool of workers, query its state and stream its status changes.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, spec, state, record, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, EventSink, TaskExecutor, IdGenerator, Clock）
//! - **impls**: 実装（InMemoryTaskStore, UpdateBus, SimulatedExecutor）
//! - **app**: アプリケーション層（ServiceBuilder, TaskService, WorkerPool）
//! - **config**: `taskhub.toml` と環境変数
//! - **observability**: 件数・ワーカー状態のスナップショット

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use crate::app::{BuildError, ServiceBuilder, TaskService};
pub use crate::config::{ConfigError, TaskhubConfig};
pub use crate::domain::{
    FailureKind, OverflowPolicy, Result, StreamItem, TaskError, TaskEvent, TaskId, TaskRecord,
    TaskStatus, TaskToCreate, TaskType,
};
pub use crate::impls::{SubscribeMode, SubscribeOptions, Subscription};
pub use crate::ports::TaskFilter;
