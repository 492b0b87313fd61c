//! EventSink port - イベント配送の抽象化
//!
//! - UpdateBus: 購読者へのマルチキャスト（本番用）
//! - NoopEventSink: 何もしない

use crate::domain::TaskEvent;

/// EventSink は TaskEvent を受け取る
///
/// `publish` は TaskStore のクリティカルセクション内から呼ばれるため、
/// 絶対にブロックしてはいけない（await もしない）。
pub trait EventSink: Send + Sync {
    fn publish(&self, event: TaskEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: TaskEvent) {}
}
