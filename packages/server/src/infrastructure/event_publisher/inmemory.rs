//! InMemory EventPublisher 実装
//!
//! 受け取ったイベントを順番どおりに保持します。永続化ストアの代わりに
//! テストやローカル検証で使用します。

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{EventPublisher, MembershipEvent};

/// 受け取ったイベントを記録する EventPublisher
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<MembershipEvent>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// これまでに記録されたイベントのコピーを取得
    pub async fn events(&self) -> Vec<MembershipEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: MembershipEvent) {
        self.events.lock().await.push(event);
    }
}
