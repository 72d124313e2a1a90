//! origin 授权记录
//!
//! origin 按字符串精确匹配（scheme + host + port），不做通配或子域推断

use crate::{error::BrokerError, service::state_store::StateStore};

#[derive(Clone)]
pub struct ConnectionStore {
    state: StateStore,
}

impl ConnectionStore {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    pub async fn is_connected(&self, origin: &str) -> Result<bool, BrokerError> {
        let state = self.state.get().await?;
        Ok(state.connections.get(origin).copied().unwrap_or(false))
    }

    pub async fn set_connected(&self, origin: &str, connected: bool) -> Result<(), BrokerError> {
        let origin = origin.to_string();
        self.state
            .patch(move |s| {
                s.connections.insert(origin, connected);
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::infrastructure::kv_store::MemoryKvStore;

    fn store() -> ConnectionStore {
        ConnectionStore::new(StateStore::new(Arc::new(MemoryKvStore::new())))
    }

    #[tokio::test]
    async fn test_unknown_origin_is_not_connected() {
        assert!(!store().is_connected("https://app.example").await.unwrap());
    }

    #[tokio::test]
    async fn test_exact_origin_match() {
        let s = store();
        s.set_connected("https://app.example", true).await.unwrap();

        assert!(s.is_connected("https://app.example").await.unwrap());
        assert!(!s.is_connected("https://app.example:8443").await.unwrap());
        assert!(!s.is_connected("http://app.example").await.unwrap());
        assert!(!s.is_connected("https://sub.app.example").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_false_revokes() {
        let s = store();
        s.set_connected("https://app.example", true).await.unwrap();
        s.set_connected("https://app.example", false).await.unwrap();
        assert!(!s.is_connected("https://app.example").await.unwrap());
    }
}
