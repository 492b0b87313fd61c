//! Task identifiers.
//!
//! # ULID ベースの ID
//! ランダム生成される ID は `task-<ULID>` 形式です。
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで生成できる（ロック不要）
//!
//! 一方、テストやリプレイ用に任意の文字列（hint）をそのまま ID にすることもできます。
//! そのため内部表現は `Ulid` ではなく `String` です。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Prefix used for randomly generated ids.
pub const TASK_ID_PREFIX: &str = "task-";

/// Opaque identifier of a submitted task.
///
/// Equality is by value. The string is never parsed back; callers should
/// treat it as an opaque token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an arbitrary string as an id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `task-<ULID>`
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{TASK_ID_PREFIX}{ulid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
