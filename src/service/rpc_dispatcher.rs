//! 页面 RPC 调度
//!
//! 对每个入站 `(origin, method, params)` 做分类：免审批读取、连接门控读取、
//! 需审批操作与透传。需审批的操作经 [`ApprovalBroker`] 挂起直至用户决定。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::{
    domain::{
        chain_config::{parse_chain_id, to_hex_chain_id},
        pending_request::{Decision, PendingDetails, PendingKind},
        rpc_method::{sign_message_bytes, RpcMethod, TransactionParams},
    },
    error::{BrokerError, RejectionKind},
    service::{
        approval_broker::ApprovalBroker, connection_store::ConnectionStore,
        wallet_broker::WalletBroker,
    },
};

#[derive(Clone)]
pub struct RpcDispatcher {
    wallet: Arc<WalletBroker>,
    connections: ConnectionStore,
    approvals: ApprovalBroker,
}

/// `wallet_switchEthereumChain` 的目标链：`params[0].chainId`，十六进制或十进制
fn switch_target(params: Option<&Value>) -> Result<i64, BrokerError> {
    let raw = params
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("chainId"))
        .filter(|v| !v.is_null())
        .ok_or(BrokerError::MissingChainId)?;

    match raw {
        Value::String(s) if !s.trim().is_empty() => parse_chain_id(s),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| BrokerError::MalformedChainId(n.to_string())),
        Value::String(_) => Err(BrokerError::MissingChainId),
        other => Err(BrokerError::MalformedChainId(other.to_string())),
    }
}

fn rejected(kind: PendingKind, decision: Decision) -> Result<(), BrokerError> {
    if decision.is_approved() {
        Ok(())
    } else {
        Err(BrokerError::UserRejected(RejectionKind::for_kind(kind)))
    }
}

impl RpcDispatcher {
    pub fn new(
        wallet: Arc<WalletBroker>,
        connections: ConnectionStore,
        approvals: ApprovalBroker,
    ) -> Self {
        Self {
            wallet,
            connections,
            approvals,
        }
    }

    pub fn approvals(&self) -> &ApprovalBroker {
        &self.approvals
    }

    /// 处理一次页面调用，直到得到结果或错误
    pub async fn dispatch(
        &self,
        origin: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let parsed = RpcMethod::parse(method);
        crate::metrics::inc_rpc_category(parsed.category().as_str());
        tracing::debug!(
            origin,
            method,
            category = parsed.category().as_str(),
            "Dispatching RPC request"
        );

        if parsed.requires_connection() && !self.connections.is_connected(origin).await? {
            return Err(BrokerError::NotConnected);
        }

        match parsed {
            RpcMethod::ChainId => {
                let chain_id = self.wallet.selected_chain_id().await;
                Ok(Value::String(to_hex_chain_id(chain_id)?))
            }
            RpcMethod::NetVersion => {
                let chain_id = self.wallet.selected_chain_id().await;
                Ok(Value::String(chain_id.to_string()))
            }
            RpcMethod::Accounts => self.accounts(origin).await,
            RpcMethod::RequestAccounts => self.request_accounts(origin, method, params).await,
            RpcMethod::SwitchChain => self.switch_chain(origin, method, params).await,
            RpcMethod::PersonalSign | RpcMethod::EthSign => {
                self.sign_message(origin, method, params).await
            }
            RpcMethod::SendTransaction => self.send_transaction(origin, method, params).await,
            RpcMethod::UnsupportedSigning(m) => Err(BrokerError::MethodNotSupported(m)),
            RpcMethod::Passthrough(m) => {
                let params = params.unwrap_or_else(|| json!([]));
                self.wallet.passthrough(&m, params).await
            }
        }
    }

    async fn accounts(&self, origin: &str) -> Result<Value, BrokerError> {
        if !self.connections.is_connected(origin).await? {
            return Ok(json!([]));
        }
        Ok(match self.wallet.stored_address().await? {
            Some(address) => json!([address]),
            None => json!([]),
        })
    }

    async fn request_accounts(
        &self,
        origin: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let address = self
            .wallet
            .stored_address()
            .await?
            .ok_or(BrokerError::NoWallet)?;

        if self.connections.is_connected(origin).await? {
            return Ok(json!([address]));
        }

        let details = PendingDetails::Connect {
            origin: origin.to_string(),
            address: address.clone(),
        };
        let (request_id, decision) = self
            .approvals
            .create(origin, method, params, details)
            .await?;

        // 连接被拒时 decision 直接是错误
        rejected(PendingKind::Connect, decision.await?)?;

        self.connections.set_connected(origin, true).await?;
        tracing::info!(%request_id, origin, "Origin connected");
        Ok(json!([address]))
    }

    async fn switch_chain(
        &self,
        origin: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let target = switch_target(params.as_ref())?;
        let mode = self.wallet.mode();
        if !self.wallet.registry().contains(mode, target).await? {
            return Err(BrokerError::ChainNotSupported(target));
        }

        let details = PendingDetails::SwitchChain {
            origin: origin.to_string(),
            from: self.wallet.selected_chain_id().await,
            to: target,
        };
        let (_, decision) = self
            .approvals
            .create(origin, method, params, details)
            .await?;
        rejected(PendingKind::SwitchChain, decision.await?)?;

        self.wallet.set_chain(target).await?;
        Ok(Value::Null)
    }

    async fn sign_message(
        &self,
        origin: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let credential = self.wallet.active_credential().await?;
        let message = sign_message_bytes(params.as_ref())?;

        let details = PendingDetails::Sign {
            origin: origin.to_string(),
            address: credential.address(),
            message: format!("0x{}", hex::encode(&message)),
        };
        let (_, decision) = self
            .approvals
            .create(origin, method, params, details)
            .await?;
        rejected(PendingKind::Sign, decision.await?)?;

        let signature = credential
            .sign_message(&message)
            .await
            .map_err(|e| BrokerError::Keystore(format!("{:#}", e)))?;
        Ok(Value::String(signature))
    }

    async fn send_transaction(
        &self,
        origin: &str,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, BrokerError> {
        let credential = self.wallet.active_credential().await?;
        let tx = TransactionParams::from_params(params.as_ref())?;

        let address = credential.address();
        if !tx.from_matches(&address) {
            return Err(BrokerError::InvalidFromAddress);
        }

        let details = PendingDetails::Tx {
            origin: origin.to_string(),
            from: address,
            to: tx.to.clone(),
            value: tx.display_value(),
            data: tx.display_data(),
        };
        let (request_id, decision) = self
            .approvals
            .create(origin, method, params, details)
            .await?;
        rejected(PendingKind::Tx, decision.await?)?;

        let draft = tx.into_draft()?;
        let hash = self
            .wallet
            .send_transaction(credential.as_ref(), draft)
            .await?;
        tracing::info!(%request_id, origin, tx_hash = %hash, "Approved transaction sent");
        Ok(Value::String(hash))
    }
}
