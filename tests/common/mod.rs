//! 测试辅助模块
//! 提供内存存储、假链客户端与完整的 broker 装配

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use omnicore::{
    app_state::AppState,
    config::{BrokerConfig, Config, LoggingConfig, NetworkConfig, ServerConfig, StorageConfig},
    domain::{chain_config::ChainInfo, rpc_method::TransactionDraft, NetworkMode},
    error::BrokerError,
    infrastructure::{
        approval_window::SurfaceCommand, event_bus::EventEnvelope, kv_store::MemoryKvStore,
    },
    service::{
        chain_client::ChainClient,
        keystore::{Credential, EthersKeystore},
    },
};
use serde_json::{json, Value};
use tokio::{sync::broadcast, task::JoinHandle};
use uuid::Uuid;

/// Hardhat 默认账户 #0
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const TEST_PASSWORD: &str = "correct horse battery";
pub const ORIGIN: &str = "https://app.example";
pub const TX_HASH: &str = "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060";

/// 记录调用的链客户端
#[derive(Default)]
pub struct FakeChainClient {
    pub requests: Mutex<Vec<(i64, String, Value)>>,
    pub sent: Mutex<Vec<(i64, String, TransactionDraft)>>,
}

impl FakeChainClient {
    pub fn sent(&self) -> Vec<(i64, String, TransactionDraft)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<(i64, String, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    async fn get_balance(&self, _chain: &ChainInfo, _address: &str) -> Result<String, BrokerError> {
        Ok("1.5".to_string())
    }

    async fn request(
        &self,
        chain: &ChainInfo,
        method: &str,
        params: Value,
    ) -> Result<Value, BrokerError> {
        self.requests
            .lock()
            .unwrap()
            .push((chain.chain_id, method.to_string(), params.clone()));
        if method == "eth_call" {
            return Err(BrokerError::Rpc {
                code: Some(3),
                message: "execution reverted".to_string(),
            });
        }
        Ok(json!({ "echo": method, "params": params }))
    }

    async fn send_transaction(
        &self,
        chain: &ChainInfo,
        credential: &dyn Credential,
        draft: TransactionDraft,
    ) -> Result<String, BrokerError> {
        self.sent
            .lock()
            .unwrap()
            .push((chain.chain_id, credential.address(), draft));
        Ok(TX_HASH.to_string())
    }
}

pub fn test_config(mode: NetworkMode) -> Config {
    Config {
        server: ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
        },
        logging: LoggingConfig {
            level: "debug".into(),
            format: "text".into(),
        },
        network: NetworkConfig { mode },
        broker: BrokerConfig {
            approval_url: "http://127.0.0.1:8787/approval".into(),
            approval_timeout_secs: None,
            kdf_iterations: 1_000,
        },
        storage: StorageConfig::default(),
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub kv: Arc<MemoryKvStore>,
    pub chain: Arc<FakeChainClient>,
    pub surfaces: broadcast::Receiver<SurfaceCommand>,
    pub events: broadcast::Receiver<EventEnvelope>,
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(MemoryKvStore::new()), NetworkMode::Testnet).await
}

pub async fn harness_with(kv: Arc<MemoryKvStore>, mode: NetworkMode) -> Harness {
    let chain = Arc::new(FakeChainClient::default());
    let state = AppState::new(
        Arc::new(test_config(mode)),
        kv.clone(),
        Arc::new(EthersKeystore::new(1_000)),
        chain.clone(),
    )
    .await
    .expect("Failed to build app state");

    let surfaces = state.surfaces.subscribe();
    let events = state.events.subscribe();
    Harness {
        state: Arc::new(state),
        kv,
        chain,
        surfaces,
        events,
    }
}

impl Harness {
    pub async fn send(&self, message: Value) -> Value {
        self.state.control.handle_value(message).await
    }

    pub async fn rpc(&self, origin: &str, method: &str, params: Value) -> Value {
        self.send(json!({
            "type": "RPC_REQUEST",
            "id": 1,
            "origin": origin,
            "method": method,
            "params": params,
        }))
        .await
    }

    /// 在后台发起 RPC，返回任务句柄（调用会在审批处挂起）
    pub fn spawn_rpc(&self, origin: &str, method: &str, params: Value) -> JoinHandle<Value> {
        let control = self.state.control.clone();
        let message = json!({
            "type": "RPC_REQUEST",
            "id": 1,
            "origin": origin,
            "method": method,
            "params": params,
        });
        tokio::spawn(async move { control.handle_value(message).await })
    }

    pub async fn import_wallet(&self) -> String {
        let resp = self
            .send(json!({
                "type": "IMPORT_PRIVATE_KEY",
                "privateKey": TEST_KEY,
                "password": TEST_PASSWORD,
            }))
            .await;
        resp["address"].as_str().expect("import failed").to_string()
    }

    /// 等待下一个打开审批界面的指令，返回请求 id
    pub async fn next_open(&mut self) -> Uuid {
        loop {
            let command = tokio::time::timeout(Duration::from_secs(5), self.surfaces.recv())
                .await
                .expect("no approval surface opened")
                .expect("surface channel closed");
            if let SurfaceCommand::Open { request_id, .. } = command {
                return request_id;
            }
        }
    }

    pub async fn decide(&self, request_id: Uuid, approved: bool) -> Value {
        self.send(json!({
            "type": "APPROVAL_DECISION",
            "requestId": request_id.to_string(),
            "approved": approved,
        }))
        .await
    }

    /// 导入钱包并授权 origin
    pub async fn connect(&mut self, origin: &str) -> String {
        let address = self.import_wallet().await;
        let pending = self.spawn_rpc(origin, "eth_requestAccounts", json!([]));
        let request_id = self.next_open().await;
        assert_eq!(self.decide(request_id, true).await, json!({ "ok": true }));
        let resp = pending.await.unwrap();
        assert_eq!(resp["result"], json!([address.clone()]));
        address
    }

    /// 取出当前已缓冲的所有事件
    pub fn drain_events(&mut self) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.events.try_recv() {
            out.push(envelope);
        }
        out
    }

    /// 取出已缓冲的界面指令，返回其中打开指令的数量
    pub fn drain_opens(&mut self) -> usize {
        let mut opens = 0;
        while let Ok(command) = self.surfaces.try_recv() {
            if matches!(command, SurfaceCommand::Open { .. }) {
                opens += 1;
            }
        }
        opens
    }

    pub fn pending_count(&self) -> usize {
        self.state.approvals.len()
    }
}
