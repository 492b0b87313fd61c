//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: インメモリの正本（TaskStore）
//! - **UpdateBus**: 購読者へのマルチキャスト（EventSink）
//! - **SimulatedExecutor**: 擬似タスク本体（TaskExecutor）

pub mod inmem_store;
pub mod simulated;
pub mod update_bus;

// 主要な型を再エクスポート
pub use self::inmem_store::InMemoryTaskStore;
pub use self::simulated::SimulatedExecutor;
pub use self::update_bus::{SubscribeMode, SubscribeOptions, Subscription, UpdateBus};
