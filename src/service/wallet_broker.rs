//! 钱包运行时上下文
//!
//! 持有唯一的活动凭证与当前选中网络，协调注册表、持久化状态、
//! 密钥库、链客户端与事件广播。所有状态变更都经由本对象。

use std::{collections::BTreeMap, sync::Arc};

use ethers::utils::parse_ether;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    domain::{
        chain_config::{to_hex_chain_id, ChainInfo, NetworkMode, NonEvmChain, NON_EVM_CHAINS},
        rpc_method::TransactionDraft,
    },
    error::BrokerError,
    infrastructure::event_bus::{EventBroadcaster, WalletEvent},
    service::{
        chain_client::ChainClient,
        chain_registry::{merge_with, order_with, ChainRegistry, CustomChainInput},
        keystore::{Credential, Keystore, NewCredential},
        state_store::{StateStore, StoredWallet},
    },
};

struct RuntimeState {
    /// 解锁期间存在
    credential: Option<Arc<dyn Credential>>,
    selected_chain_id: i64,
}

/// 运行时状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    pub unlocked: bool,
    pub selected_chain_id: i64,
}

/// `GET_STATE` 输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub has_wallet: bool,
    pub address: String,
    pub unlocked: bool,
    pub chain_id: i64,
    pub chain_name: String,
}

/// 合并后的网络表与展示顺序
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainsView {
    pub chains: BTreeMap<i64, ChainInfo>,
    pub order: Vec<i64>,
    pub mode: NetworkMode,
    /// 非 EVM 占位网络，仅展示
    pub non_evm: &'static [NonEvmChain],
}

/// 新建钱包结果
#[derive(Debug, Clone, Serialize)]
pub struct CreatedWallet {
    pub address: String,
    pub mnemonic: String,
}

pub struct WalletBroker {
    mode: NetworkMode,
    registry: Arc<ChainRegistry>,
    state: StateStore,
    keystore: Arc<dyn Keystore>,
    chain_client: Arc<dyn ChainClient>,
    events: Arc<dyn EventBroadcaster>,
    runtime: RwLock<RuntimeState>,
}

impl WalletBroker {
    pub fn new(
        mode: NetworkMode,
        registry: Arc<ChainRegistry>,
        state: StateStore,
        keystore: Arc<dyn Keystore>,
        chain_client: Arc<dyn ChainClient>,
        events: Arc<dyn EventBroadcaster>,
    ) -> Self {
        Self {
            mode,
            registry,
            state,
            keystore,
            chain_client,
            events,
            runtime: RwLock::new(RuntimeState {
                credential: None,
                selected_chain_id: mode.default_chain_id(),
            }),
        }
    }

    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    /// 启动时恢复选中网络；持久化的网络不在当前注册表中时重置为默认并写回
    pub async fn load_persisted(&self) -> Result<i64, BrokerError> {
        let stored = self.state.get().await?;
        let default_id = self.mode.default_chain_id();
        let mut selected = stored.selected_chain_id.unwrap_or(default_id);

        if !self.registry.contains(self.mode, selected).await? {
            tracing::warn!(
                stored_chain_id = selected,
                default_chain_id = default_id,
                "Persisted chain not available, resetting to default"
            );
            selected = default_id;
            self.state
                .patch(move |s| s.selected_chain_id = Some(selected))
                .await?;
        }

        self.runtime.write().await.selected_chain_id = selected;
        tracing::info!(mode = %self.mode, chain_id = selected, "Wallet state loaded");
        Ok(selected)
    }

    async fn broadcast(&self, event: WalletEvent) {
        let name = event.name();
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(event = name, error = %e, "Failed to broadcast wallet event");
        }
    }

    async fn broadcast_chain(&self, chain_id: i64) -> Result<(), BrokerError> {
        let hex = to_hex_chain_id(chain_id)?;
        self.broadcast(WalletEvent::ChainChanged(hex)).await;
        Ok(())
    }

    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let runtime = self.runtime.read().await;
        RuntimeSnapshot {
            unlocked: runtime.credential.is_some(),
            selected_chain_id: runtime.selected_chain_id,
        }
    }

    pub async fn selected_chain_id(&self) -> i64 {
        self.runtime.read().await.selected_chain_id
    }

    /// 当前选中网络的定义
    pub async fn selected_chain(&self) -> Result<ChainInfo, BrokerError> {
        let chain_id = self.selected_chain_id().await;
        self.registry
            .get(self.mode, chain_id)
            .await?
            .ok_or(BrokerError::UnsupportedChain(chain_id))
    }

    /// 持久化的钱包地址（无需解锁）
    pub async fn stored_address(&self) -> Result<Option<String>, BrokerError> {
        Ok(self
            .state
            .stored_wallet()
            .await?
            .map(|w| w.address)
            .filter(|a| !a.is_empty()))
    }

    /// 已解锁的签名凭证
    pub async fn active_credential(&self) -> Result<Arc<dyn Credential>, BrokerError> {
        self.runtime
            .read()
            .await
            .credential
            .clone()
            .ok_or(BrokerError::WalletLocked)
    }

    pub async fn status(&self) -> Result<WalletStatus, BrokerError> {
        let stored = self.state.get().await?;
        let snapshot = self.snapshot().await;
        let chain_name = self
            .registry
            .get(self.mode, snapshot.selected_chain_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_else(|| "Unknown".to_string());

        let wallet = stored.wallet.as_ref();
        Ok(WalletStatus {
            has_wallet: wallet.map(|w| !w.encrypted_json.is_empty()).unwrap_or(false),
            address: wallet.map(|w| w.address.clone()).unwrap_or_default(),
            unlocked: snapshot.unlocked,
            chain_id: snapshot.selected_chain_id,
            chain_name,
        })
    }

    pub async fn chains(&self, mode: NetworkMode) -> Result<ChainsView, BrokerError> {
        let store = self.registry.custom_networks().await?;
        let bucket = store.bucket(mode);
        Ok(ChainsView {
            chains: merge_with(mode, bucket),
            order: order_with(mode, bucket),
            mode,
            non_evm: NON_EVM_CHAINS,
        })
    }

    pub async fn add_custom_chain(
        &self,
        mode: NetworkMode,
        input: &CustomChainInput,
    ) -> Result<ChainsView, BrokerError> {
        self.registry.add_custom(mode, input).await?;
        self.chains(mode).await
    }

    /// 删除自定义网络；若删除的是当前选中网络，重置为默认网络并广播一次
    pub async fn remove_custom_chain(
        &self,
        mode: NetworkMode,
        chain_id: i64,
    ) -> Result<ChainsView, BrokerError> {
        let removed = self.registry.remove_custom(mode, chain_id).await?;

        if removed && mode == self.mode {
            let mut runtime = self.runtime.write().await;
            if runtime.selected_chain_id == chain_id {
                let default_id = mode.default_chain_id();
                runtime.selected_chain_id = default_id;
                drop(runtime);

                self.state
                    .patch(move |s| s.selected_chain_id = Some(default_id))
                    .await?;
                tracing::info!(
                    removed_chain_id = chain_id,
                    chain_id = default_id,
                    "Selected chain removed, reset to default"
                );
                self.broadcast_chain(default_id).await?;
            }
        }

        self.chains(mode).await
    }

    async fn activate(
        &self,
        created: NewCredential,
    ) -> Result<(String, Option<String>), BrokerError> {
        let address = created.credential.address();
        let wallet = StoredWallet {
            encrypted_json: created.encrypted_blob,
            address: address.clone(),
        };
        self.state.patch(move |s| s.wallet = Some(wallet)).await?;

        self.runtime.write().await.credential = Some(created.credential);
        self.broadcast(WalletEvent::AccountsChanged(vec![address.clone()]))
            .await;

        let explorer = self
            .selected_chain()
            .await
            .ok()
            .and_then(|c| c.explorer_address_url(&address));
        tracing::debug!(
            address = %address,
            explorer = explorer.as_deref().unwrap_or("-"),
            "Wallet activated"
        );
        Ok((address, created.mnemonic))
    }

    pub async fn create_wallet(&self, password: &str) -> Result<CreatedWallet, BrokerError> {
        let created = self
            .keystore
            .create_random(password)
            .await
            .map_err(|e| BrokerError::Keystore(format!("{:#}", e)))?;
        let (address, mnemonic) = self.activate(created).await?;
        tracing::info!(address = %address, "Wallet created");
        Ok(CreatedWallet {
            address,
            mnemonic: mnemonic.unwrap_or_default(),
        })
    }

    pub async fn import_private_key(
        &self,
        private_key: &str,
        password: &str,
    ) -> Result<String, BrokerError> {
        let created = self
            .keystore
            .import_private_key(private_key, password)
            .await
            .map_err(|e| BrokerError::Keystore(format!("{:#}", e)))?;
        let (address, _) = self.activate(created).await?;
        tracing::info!(address = %address, "Wallet imported");
        Ok(address)
    }

    pub async fn unlock(&self, password: &str) -> Result<String, BrokerError> {
        let blob = self
            .state
            .stored_wallet()
            .await?
            .map(|w| w.encrypted_json)
            .filter(|b| !b.is_empty())
            .ok_or(BrokerError::NoWallet)?;

        let credential = self
            .keystore
            .unlock(&blob, password)
            .await
            .map_err(|e| BrokerError::Keystore(format!("{:#}", e)))?;
        let address = credential.address();

        self.runtime.write().await.credential = Some(credential);
        self.broadcast(WalletEvent::AccountsChanged(vec![address.clone()]))
            .await;
        tracing::info!(address = %address, "Wallet unlocked");
        Ok(address)
    }

    pub async fn lock(&self) {
        self.runtime.write().await.credential = None;
        self.broadcast(WalletEvent::AccountsChanged(Vec::new())).await;
        tracing::info!("Wallet locked");
    }

    /// 切换网络：更新运行时、持久化并广播 `chainChanged`
    pub async fn set_chain(&self, chain_id: i64) -> Result<i64, BrokerError> {
        if !self.registry.contains(self.mode, chain_id).await? {
            return Err(BrokerError::UnsupportedChain(chain_id));
        }

        self.runtime.write().await.selected_chain_id = chain_id;
        self.state
            .patch(move |s| s.selected_chain_id = Some(chain_id))
            .await?;
        self.broadcast_chain(chain_id).await?;
        tracing::info!(chain_id, "Chain selected");
        Ok(chain_id)
    }

    /// 当前网络上的原生币余额；无钱包时为 `"0"`
    pub async fn get_balance(&self) -> Result<String, BrokerError> {
        let Some(address) = self.stored_address().await? else {
            return Ok("0".to_string());
        };
        let chain = self.selected_chain().await?;
        self.chain_client.get_balance(&chain, &address).await
    }

    /// 原生币转账，`amount` 以 ether 为单位
    pub async fn send_native(&self, to: &str, amount: &str) -> Result<String, BrokerError> {
        let credential = self.active_credential().await?;
        let value = parse_ether(amount.trim())
            .map_err(|e| BrokerError::InvalidParams(format!("invalid amount: {}", e)))?;
        let draft = TransactionDraft::native_transfer(to.trim().to_string(), value);
        self.send_transaction(credential.as_ref(), draft).await
    }

    /// 在当前网络上签名并广播
    pub async fn send_transaction(
        &self,
        credential: &dyn Credential,
        draft: TransactionDraft,
    ) -> Result<String, BrokerError> {
        let chain = self.selected_chain().await?;
        let hash = self
            .chain_client
            .send_transaction(&chain, credential, draft)
            .await?;
        tracing::info!(
            chain_id = chain.chain_id,
            tx_hash = %hash,
            explorer = chain.explorer_tx_url(&hash).as_deref().unwrap_or("-"),
            "Transaction broadcast"
        );
        Ok(hash)
    }

    /// 透传到当前网络的 JSON-RPC 节点
    pub async fn passthrough(&self, method: &str, params: Value) -> Result<Value, BrokerError> {
        let chain = self.selected_chain().await?;
        self.chain_client.request(&chain, method, params).await
    }
}
