//! 控制消息
//!
//! 本地 UI 与页面中继使用的请求/响应消息集，按 `type` 区分。
//! 每条消息的失败都在此边界转换为 `{ "error": message }`。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    domain::chain_config::{parse_chain_id, NetworkMode},
    error::BrokerError,
    service::{
        approval_broker::ApprovalBroker, chain_registry::CustomChainInput,
        rpc_dispatcher::RpcDispatcher, wallet_broker::WalletBroker,
    },
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    GetState,
    GetChains {
        #[serde(default)]
        mode: Option<NetworkMode>,
    },
    AddCustomChain {
        #[serde(default)]
        mode: Option<NetworkMode>,
        #[serde(default)]
        chain: CustomChainInput,
    },
    RemoveCustomChain {
        #[serde(default)]
        mode: Option<NetworkMode>,
        #[serde(rename = "chainId", default)]
        chain_id: Value,
    },
    CreateWallet {
        password: String,
    },
    ImportPrivateKey {
        #[serde(rename = "privateKey")]
        private_key: String,
        password: String,
    },
    Unlock {
        password: String,
    },
    Lock,
    SetChain {
        #[serde(rename = "chainId", default)]
        chain_id: Value,
    },
    GetBalance,
    SendNative {
        to: String,
        amount: String,
    },
    RpcRequest {
        #[serde(default)]
        id: Value,
        origin: String,
        method: String,
        #[serde(default)]
        params: Option<Value>,
    },
    ApprovalGet {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    ApprovalDecision {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default)]
        approved: bool,
    },
}

impl ControlMessage {
    pub const TYPES: &'static [&'static str] = &[
        "GET_STATE",
        "GET_CHAINS",
        "ADD_CUSTOM_CHAIN",
        "REMOVE_CUSTOM_CHAIN",
        "CREATE_WALLET",
        "IMPORT_PRIVATE_KEY",
        "UNLOCK",
        "LOCK",
        "SET_CHAIN",
        "GET_BALANCE",
        "SEND_NATIVE",
        "RPC_REQUEST",
        "APPROVAL_GET",
        "APPROVAL_DECISION",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::GetState => "GET_STATE",
            ControlMessage::GetChains { .. } => "GET_CHAINS",
            ControlMessage::AddCustomChain { .. } => "ADD_CUSTOM_CHAIN",
            ControlMessage::RemoveCustomChain { .. } => "REMOVE_CUSTOM_CHAIN",
            ControlMessage::CreateWallet { .. } => "CREATE_WALLET",
            ControlMessage::ImportPrivateKey { .. } => "IMPORT_PRIVATE_KEY",
            ControlMessage::Unlock { .. } => "UNLOCK",
            ControlMessage::Lock => "LOCK",
            ControlMessage::SetChain { .. } => "SET_CHAIN",
            ControlMessage::GetBalance => "GET_BALANCE",
            ControlMessage::SendNative { .. } => "SEND_NATIVE",
            ControlMessage::RpcRequest { .. } => "RPC_REQUEST",
            ControlMessage::ApprovalGet { .. } => "APPROVAL_GET",
            ControlMessage::ApprovalDecision { .. } => "APPROVAL_DECISION",
        }
    }

    /// 从原始 JSON 解析；未知 `type` 返回 "Unknown message"
    pub fn from_value(raw: Value) -> Result<Self, BrokerError> {
        let known = raw
            .get("type")
            .and_then(Value::as_str)
            .map(|t| Self::TYPES.contains(&t))
            .unwrap_or(false);
        if !known {
            return Err(BrokerError::UnknownMessage);
        }
        serde_json::from_value(raw).map_err(|e| BrokerError::InvalidParams(e.to_string()))
    }
}

/// 链 ID 字段：整数或 `"137"` / `"0x89"`
fn chain_id_field(raw: &Value) -> Result<i64, BrokerError> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| BrokerError::MalformedChainId(n.to_string())),
        Value::String(s) => parse_chain_id(s),
        Value::Null => Err(BrokerError::MissingChainId),
        other => Err(BrokerError::MalformedChainId(other.to_string())),
    }
}

/// 审批 id 无法解析时视同不存在
fn request_id(raw: &str) -> Result<Uuid, BrokerError> {
    Uuid::parse_str(raw.trim()).map_err(|_| BrokerError::RequestNotFound)
}

fn error_body(err: &BrokerError) -> Value {
    json!({ "error": err.to_string() })
}

#[derive(Clone)]
pub struct ControlHandler {
    wallet: Arc<WalletBroker>,
    dispatcher: RpcDispatcher,
}

impl ControlHandler {
    pub fn new(wallet: Arc<WalletBroker>, dispatcher: RpcDispatcher) -> Self {
        Self { wallet, dispatcher }
    }

    fn approvals(&self) -> &ApprovalBroker {
        self.dispatcher.approvals()
    }

    /// 处理原始 JSON 消息
    pub async fn handle_value(&self, raw: Value) -> Value {
        match ControlMessage::from_value(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected control message");
                error_body(&e)
            }
        }
    }

    /// 处理一条消息，总是返回 JSON（成功输出或 `{ error }`）
    pub async fn handle(&self, message: ControlMessage) -> Value {
        let type_name = message.type_name();

        // RPC 响应保留调用方的 id
        if let ControlMessage::RpcRequest {
            id,
            origin,
            method,
            params,
        } = message
        {
            return match self.dispatcher.dispatch(&origin, &method, params).await {
                Ok(result) => {
                    crate::metrics::count_ok(type_name);
                    json!({ "id": id, "result": result })
                }
                Err(e) => {
                    crate::metrics::count_err(type_name);
                    tracing::info!(
                        origin = %origin,
                        method = %method,
                        error = %e,
                        "RPC request failed"
                    );
                    json!({ "id": id, "error": e.to_string() })
                }
            };
        }

        match self.execute(message).await {
            Ok(output) => {
                crate::metrics::count_ok(type_name);
                output
            }
            Err(e) => {
                crate::metrics::count_err(type_name);
                tracing::info!(message_type = type_name, error = %e, "Control message failed");
                error_body(&e)
            }
        }
    }

    async fn execute(&self, message: ControlMessage) -> Result<Value, BrokerError> {
        let default_mode = self.wallet.mode();

        let output = match message {
            ControlMessage::GetState => serde_json::to_value(self.wallet.status().await?)?,
            ControlMessage::GetChains { mode } => {
                serde_json::to_value(self.wallet.chains(mode.unwrap_or(default_mode)).await?)?
            }
            ControlMessage::AddCustomChain { mode, chain } => {
                let view = self
                    .wallet
                    .add_custom_chain(mode.unwrap_or(default_mode), &chain)
                    .await?;
                json!({ "ok": true, "chains": view.chains, "order": view.order })
            }
            ControlMessage::RemoveCustomChain { mode, chain_id } => {
                let chain_id = chain_id_field(&chain_id)?;
                let view = self
                    .wallet
                    .remove_custom_chain(mode.unwrap_or(default_mode), chain_id)
                    .await?;
                json!({ "ok": true, "chains": view.chains, "order": view.order })
            }
            ControlMessage::CreateWallet { password } => {
                serde_json::to_value(self.wallet.create_wallet(&password).await?)?
            }
            ControlMessage::ImportPrivateKey {
                private_key,
                password,
            } => {
                let address = self.wallet.import_private_key(&private_key, &password).await?;
                json!({ "address": address })
            }
            ControlMessage::Unlock { password } => {
                let address = self.wallet.unlock(&password).await?;
                json!({ "address": address })
            }
            ControlMessage::Lock => {
                self.wallet.lock().await;
                json!({ "ok": true })
            }
            ControlMessage::SetChain { chain_id } => {
                let chain_id = self.wallet.set_chain(chain_id_field(&chain_id)?).await?;
                json!({ "chainId": chain_id })
            }
            ControlMessage::GetBalance => {
                json!({ "balance": self.wallet.get_balance().await? })
            }
            ControlMessage::SendNative { to, amount } => {
                json!({ "hash": self.wallet.send_native(&to, &amount).await? })
            }
            ControlMessage::ApprovalGet { request_id: raw } => {
                serde_json::to_value(self.approvals().get(request_id(&raw)?)?)?
            }
            ControlMessage::ApprovalDecision {
                request_id: raw,
                approved,
            } => {
                self.approvals().decide(request_id(&raw)?, approved).await?;
                json!({ "ok": true })
            }
            ControlMessage::RpcRequest { .. } => {
                return Err(BrokerError::Internal("RPC request routed to execute".to_string()))
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_messages() {
        let msg = ControlMessage::from_value(json!({
            "type": "RPC_REQUEST",
            "id": 7,
            "origin": "https://app.example",
            "method": "eth_chainId"
        }))
        .unwrap();
        assert_eq!(msg.type_name(), "RPC_REQUEST");

        let msg = ControlMessage::from_value(json!({
            "type": "APPROVAL_DECISION",
            "requestId": "abc",
            "approved": true
        }))
        .unwrap();
        assert!(matches!(
            msg,
            ControlMessage::ApprovalDecision { approved: true, .. }
        ));

        let msg = ControlMessage::from_value(json!({
            "type": "ADD_CUSTOM_CHAIN",
            "mode": "mainnet",
            "chain": {
                "name": "Local",
                "rpcUrl": "http://localhost:8545",
                "chainId": 31337,
                "nativeSymbol": "eth"
            }
        }))
        .unwrap();
        match msg {
            ControlMessage::AddCustomChain { mode, chain } => {
                assert_eq!(mode, Some(NetworkMode::Mainnet));
                assert_eq!(chain.rpc_url, "http://localhost:8545");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            ControlMessage::from_value(json!({ "type": "SELF_DESTRUCT" })).err(),
            Some(BrokerError::UnknownMessage)
        );
        assert_eq!(
            ControlMessage::from_value(json!({ "password": "x" })).err(),
            Some(BrokerError::UnknownMessage)
        );
    }

    #[test]
    fn test_every_listed_type_has_a_variant() {
        for t in ControlMessage::TYPES {
            // 缺字段的消息报参数错误而不是未知消息
            let err = ControlMessage::from_value(json!({ "type": t })).err();
            assert_ne!(err, Some(BrokerError::UnknownMessage), "{}", t);
        }
    }

    #[test]
    fn test_chain_id_field() {
        assert_eq!(chain_id_field(&json!(8453)).unwrap(), 8453);
        assert_eq!(chain_id_field(&json!("0x2105")).unwrap(), 8453);
        assert_eq!(chain_id_field(&Value::Null), Err(BrokerError::MissingChainId));
        assert!(request_id("not-a-uuid").is_err());
    }
}
