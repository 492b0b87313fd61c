//! App - アプリケーション層
//!
//! ports を組み合わせて、投入から完了までの流れを組み立てます。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder**: 設定からの構築とワイヤリング
//! - **TaskService**: 投入・照会・キャンセル・購読の入口
//! - **WorkerPool**: 固定数ワーカーと有界キュー

pub mod builder;
pub mod service;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ServiceBuilder};
pub use self::service::TaskService;
pub use self::worker_pool::{CancelOutcome, PoolOptions, Pushed, QueueSlot, WorkerPool};
