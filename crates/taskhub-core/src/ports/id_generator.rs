//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）
//! - **SequentialGenerator**: 連番（テスト用、決定的）
//!
//! どちらもロックを取らない（stateless または atomic のみ）。

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::{Result, TaskError, TaskId};
use crate::ports::Clock;

/// IdGenerator は TaskId を生成
///
/// - `hint` あり: hint から決定的に ID を作る（テスト・リプレイ用）。空文字列はエラー
/// - `hint` なし: 新しい一意な ID を作る
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数スレッドから使える）
pub trait IdGenerator: Send + Sync {
    fn generate(&self, hint: Option<&str>) -> Result<TaskId> {
        match hint {
            Some(hint) => from_hint(hint),
            None => Ok(self.fresh()),
        }
    }

    /// A new id, unique for the lifetime of the generator.
    fn fresh(&self) -> TaskId;
}

/// Deterministic id for a replay/test hint: the hint itself.
pub fn from_hint(hint: &str) -> Result<TaskId> {
    if hint.is_empty() {
        return Err(TaskError::InvalidArgument(
            "id hint must not be empty".to_string(),
        ));
    }
    Ok(TaskId::new(hint))
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// ランダム部分は `rand` から取るので、同じミリ秒内でも衝突しません。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn fresh(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from_ulid(ulid)
    }
}

/// `{prefix}-000001`, `{prefix}-000002`, ...
pub struct SequentialGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialGenerator {
    fn fresh(&self) -> TaskId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        TaskId::new(format!("{}-{n:06}", self.prefix))
    }
}
