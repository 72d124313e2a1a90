//! 持久化钱包状态（键 `omni_state_v1`）

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::BrokerError,
    infrastructure::kv_store::{self, KvStore},
};

pub const STATE_KEY: &str = "omni_state_v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredWallet {
    /// 加密凭证（JSON 封装）
    pub encrypted_json: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<StoredWallet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_chain_id: Option<i64>,
    /// origin => 是否已授权
    #[serde(default)]
    pub connections: BTreeMap<String, bool>,
}

/// 状态读写，无事务隔离：patch 为读-改-写
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn get(&self) -> Result<StoredState, BrokerError> {
        kv_store::load::<StoredState>(self.kv.as_ref(), STATE_KEY)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))
    }

    pub async fn set(&self, state: &StoredState) -> Result<(), BrokerError> {
        kv_store::save(self.kv.as_ref(), STATE_KEY, state)
            .await
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))
    }

    pub async fn patch<F>(&self, f: F) -> Result<StoredState, BrokerError>
    where
        F: FnOnce(&mut StoredState) + Send,
    {
        let mut state = self.get().await?;
        f(&mut state);
        self.set(&state).await?;
        Ok(state)
    }

    pub async fn stored_wallet(&self) -> Result<Option<StoredWallet>, BrokerError> {
        Ok(self.get().await?.wallet)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::infrastructure::kv_store::MemoryKvStore;

    #[tokio::test]
    async fn test_empty_state_defaults() {
        let store = StateStore::new(Arc::new(MemoryKvStore::new()));
        let state = store.get().await.unwrap();
        assert!(state.wallet.is_none());
        assert!(state.selected_chain_id.is_none());
        assert!(state.connections.is_empty());
    }

    #[tokio::test]
    async fn test_patch_keeps_other_fields() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = StateStore::new(kv.clone());

        store
            .patch(|s| {
                s.wallet = Some(StoredWallet {
                    encrypted_json: "{}".into(),
                    address: "0xabc".into(),
                })
            })
            .await
            .unwrap();
        store.patch(|s| s.selected_chain_id = Some(8453)).await.unwrap();

        let raw = kv.get(STATE_KEY).await.unwrap().unwrap();
        assert_eq!(raw["wallet"]["address"], json!("0xabc"));
        assert_eq!(raw["selectedChainId"], json!(8453));
    }

    #[tokio::test]
    async fn test_reads_state_without_connections() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(STATE_KEY, json!({"selectedChainId": 1})).await.unwrap();

        let state = StateStore::new(kv).get().await.unwrap();
        assert_eq!(state.selected_chain_id, Some(1));
        assert!(state.connections.is_empty());
    }
}
