//! 网络注册表
//!
//! 内置网络与用户自定义网络按模式合并。自定义网络持久化在
//! `omni.customNetworks.v1`，并由注册表持有读穿缓存，写入时整体替换。

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    domain::chain_config::{
        is_valid_http_url, normalize_url, parse_chain_id, ChainInfo, NetworkMode,
        MAX_SAFE_CHAIN_ID,
    },
    error::BrokerError,
    infrastructure::kv_store::{self, KvStore},
};

pub const CUSTOM_NETWORKS_KEY: &str = "omni.customNetworks.v1";

/// 按模式分桶的自定义网络
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomNetworksStore {
    #[serde(default)]
    pub mainnet: BTreeMap<i64, ChainInfo>,
    #[serde(default)]
    pub testnet: BTreeMap<i64, ChainInfo>,
}

impl CustomNetworksStore {
    pub fn bucket(&self, mode: NetworkMode) -> &BTreeMap<i64, ChainInfo> {
        match mode {
            NetworkMode::Mainnet => &self.mainnet,
            NetworkMode::Testnet => &self.testnet,
        }
    }

    pub fn bucket_mut(&mut self, mode: NetworkMode) -> &mut BTreeMap<i64, ChainInfo> {
        match mode {
            NetworkMode::Mainnet => &mut self.mainnet,
            NetworkMode::Testnet => &mut self.testnet,
        }
    }
}

/// 添加自定义网络的原始输入
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomChainInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rpc_url: String,
    /// 整数，或 `"137"` / `"0x89"` 形式的字符串
    #[serde(default)]
    pub chain_id: Value,
    #[serde(default)]
    pub native_symbol: String,
    #[serde(default)]
    pub block_explorer_url: Option<String>,
}

fn positive_chain_id(raw: &Value) -> Option<i64> {
    let id = match raw {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => parse_chain_id(s).ok()?,
        _ => return None,
    };
    (id > 0 && id <= MAX_SAFE_CHAIN_ID).then_some(id)
}

pub struct ChainRegistry {
    kv: Arc<dyn KvStore>,
    cache: Mutex<Option<CustomNetworksStore>>,
}

impl ChainRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: Mutex::new(None),
        }
    }

    async fn load_into(
        &self,
        slot: &mut Option<CustomNetworksStore>,
    ) -> Result<CustomNetworksStore, BrokerError> {
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store = kv_store::load::<CustomNetworksStore>(self.kv.as_ref(), CUSTOM_NETWORKS_KEY)
            .await
            .map_err(|e| BrokerError::Storage(format!("{:#}", e)))?
            .unwrap_or_default();
        *slot = Some(store.clone());
        Ok(store)
    }

    /// 当前自定义网络（命中缓存时不访问存储）
    pub async fn custom_networks(&self) -> Result<CustomNetworksStore, BrokerError> {
        let mut slot = self.cache.lock().await;
        self.load_into(&mut slot).await
    }

    /// 丢弃缓存，下次读取回源
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// 读-改-写自定义网络，整个过程持有缓存锁
    async fn update<F, T>(&self, f: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&mut CustomNetworksStore) -> T + Send,
        T: Send,
    {
        let mut slot = self.cache.lock().await;
        let mut store = self.load_into(&mut slot).await?;
        let out = f(&mut store);

        // 写失败时缓存失效，避免与存储不一致
        if let Err(e) = kv_store::save(self.kv.as_ref(), CUSTOM_NETWORKS_KEY, &store).await {
            *slot = None;
            return Err(BrokerError::Storage(format!("{:#}", e)));
        }
        *slot = Some(store);
        Ok(out)
    }

    /// 合并内置与自定义网络；自定义条目覆盖同 ID 内置条目并标记 `isCustom`
    pub async fn merged(&self, mode: NetworkMode) -> Result<BTreeMap<i64, ChainInfo>, BrokerError> {
        let store = self.custom_networks().await?;
        Ok(merge_with(mode, store.bucket(mode)))
    }

    /// 展示顺序：内置固定顺序，其后为按名称升序的自定义网络，按 ID 去重
    pub async fn order(&self, mode: NetworkMode) -> Result<Vec<i64>, BrokerError> {
        let store = self.custom_networks().await?;
        Ok(order_with(mode, store.bucket(mode)))
    }

    pub async fn get(
        &self,
        mode: NetworkMode,
        chain_id: i64,
    ) -> Result<Option<ChainInfo>, BrokerError> {
        Ok(self.merged(mode).await?.remove(&chain_id))
    }

    pub async fn contains(&self, mode: NetworkMode, chain_id: i64) -> Result<bool, BrokerError> {
        Ok(self.get(mode, chain_id).await?.is_some())
    }

    /// 校验用户输入并生成网络定义
    pub fn validate_custom(
        mode: NetworkMode,
        input: &CustomChainInput,
    ) -> Result<ChainInfo, BrokerError> {
        let name = input.name.trim();
        let rpc_url = normalize_url(&input.rpc_url);
        let native_symbol = input.native_symbol.trim().to_uppercase();

        if name.is_empty() {
            return Err(BrokerError::NameRequired);
        }
        let chain_id = positive_chain_id(&input.chain_id).ok_or(BrokerError::InvalidChainId)?;
        if rpc_url.is_empty() || !is_valid_http_url(&rpc_url) {
            return Err(BrokerError::InvalidRpcUrl);
        }
        let symbol_len = native_symbol.chars().count();
        if !(2..=8).contains(&symbol_len) {
            return Err(BrokerError::InvalidSymbol);
        }

        let explorer = input
            .block_explorer_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(explorer) = explorer {
            if !is_valid_http_url(explorer) {
                return Err(BrokerError::InvalidExplorerUrl);
            }
        }

        Ok(ChainInfo {
            chain_id,
            name: name.to_string(),
            native_symbol,
            rpc_urls: vec![rpc_url],
            block_explorer_url: explorer.map(normalize_url),
            is_testnet: mode.is_testnet(),
            is_custom: true,
        })
    }

    pub async fn add_custom(
        &self,
        mode: NetworkMode,
        input: &CustomChainInput,
    ) -> Result<ChainInfo, BrokerError> {
        let chain = Self::validate_custom(mode, input)?;
        let stored = chain.clone();
        self.update(move |store| {
            store.bucket_mut(mode).insert(stored.chain_id, stored);
        })
        .await?;

        tracing::info!(
            mode = %mode,
            chain_id = chain.chain_id,
            name = %chain.name,
            "Custom network saved"
        );
        Ok(chain)
    }

    /// 删除自定义网络；不存在时不写存储，返回 false
    pub async fn remove_custom(
        &self,
        mode: NetworkMode,
        chain_id: i64,
    ) -> Result<bool, BrokerError> {
        if !self.custom_networks().await?.bucket(mode).contains_key(&chain_id) {
            return Ok(false);
        }
        let removed = self
            .update(move |store| store.bucket_mut(mode).remove(&chain_id).is_some())
            .await?;
        if removed {
            tracing::info!(mode = %mode, chain_id, "Custom network removed");
        }
        Ok(removed)
    }
}

pub fn merge_with(
    mode: NetworkMode,
    customs: &BTreeMap<i64, ChainInfo>,
) -> BTreeMap<i64, ChainInfo> {
    let mut merged: BTreeMap<i64, ChainInfo> = mode
        .builtin_chains()
        .iter()
        .map(|c| (c.chain_id, c.clone()))
        .collect();

    for (id, chain) in customs {
        let mut chain = chain.clone();
        chain.chain_id = *id;
        chain.is_custom = true;
        chain.is_testnet = mode.is_testnet();
        merged.insert(*id, chain);
    }
    merged
}

pub fn order_with(mode: NetworkMode, customs: &BTreeMap<i64, ChainInfo>) -> Vec<i64> {
    let mut custom: Vec<(&str, i64)> = customs
        .iter()
        .map(|(id, c)| (c.name.as_str(), *id))
        .collect();
    // 名称相同按 ID 排序，保证确定性
    custom.sort();

    let mut seen = HashSet::new();
    mode.builtin_chains()
        .iter()
        .map(|c| c.chain_id)
        .chain(custom.into_iter().map(|(_, id)| id))
        .filter(|id| seen.insert(*id))
        .collect()
}
