// Event Bus
// 向所有打开的页面上下文推送钱包事件（accountsChanged / chainChanged）

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============ 事件类型定义 ============

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum WalletEvent {
    /// 当前可见账户列表（锁定时为空）
    AccountsChanged(Vec<String>),
    /// `0x` 十六进制链 ID
    ChainChanged(String),
}

impl WalletEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WalletEvent::AccountsChanged(_) => "accountsChanged",
            WalletEvent::ChainChanged(_) => "chainChanged",
        }
    }
}

/// 投递给页面的消息：`{ "type": "OMNI_EVENT", "event": ..., "payload": ... }`
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    #[serde(skip)]
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub event: WalletEvent,
    #[serde(skip)]
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventEnvelope {
    pub fn new(event: WalletEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: "OMNI_EVENT",
            event,
            published_at: chrono::Utc::now(),
        }
    }
}

// ============ Broadcaster 接口 ============

#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    /// 发布事件到所有订阅者；无订阅者不是错误
    async fn publish(&self, event: WalletEvent) -> Result<()>;
}

// ============ 基于 tokio broadcast 的实现 ============

pub struct ChannelBroadcaster {
    sender: broadcast::Sender<EventEnvelope>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventBroadcaster for ChannelBroadcaster {
    async fn publish(&self, event: WalletEvent) -> Result<()> {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event = envelope.event.name(),
            event_id = %envelope.event_id,
            subscribers = self.sender.receiver_count(),
            "Broadcasting wallet event"
        );
        // send 仅在没有接收者时失败
        let _ = self.sender.send(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = ChannelBroadcaster::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(WalletEvent::ChainChanged("0x1".into()))
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap().event, WalletEvent::ChainChanged("0x1".into()));
        assert_eq!(b.recv().await.unwrap().event, WalletEvent::ChainChanged("0x1".into()));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = ChannelBroadcaster::default();
        assert!(bus
            .publish(WalletEvent::AccountsChanged(vec![]))
            .await
            .is_ok());
    }

    #[test]
    fn test_page_message_shape() {
        let envelope = EventEnvelope::new(WalletEvent::AccountsChanged(vec!["0xabc".into()]));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({ "type": "OMNI_EVENT", "event": "accountsChanged", "payload": ["0xabc"] })
        );
    }
}
