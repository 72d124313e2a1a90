//! 链 JSON-RPC 客户端（外部协作方）
//!
//! 余额查询、透传调用与交易签名广播，均针对调用方给定的网络。
//! 节点返回的错误原样上抛，不做重试。

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use ethers::{
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest,
        TransactionRequest, U256,
    },
    utils::format_ether,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    domain::{chain_config::ChainInfo, rpc_method::TransactionDraft},
    error::BrokerError,
    infrastructure::rpc_validator::{split_rpc_response, validate_balance, validate_tx_hash},
    service::keystore::Credential,
};

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// 原生币余额（以 ether 为单位的十进制字符串）
    async fn get_balance(&self, chain: &ChainInfo, address: &str) -> Result<String, BrokerError>;

    /// 透传任意方法，返回节点的 `result`
    async fn request(&self, chain: &ChainInfo, method: &str, params: Value)
        -> Result<Value, BrokerError>;

    /// 补全、签名并广播交易，返回交易哈希
    async fn send_transaction(
        &self,
        chain: &ChainInfo,
        credential: &dyn Credential,
        draft: TransactionDraft,
    ) -> Result<String, BrokerError>;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: Value,
}

pub struct JsonRpcChainClient {
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl Default for JsonRpcChainClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl JsonRpcChainClient {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc_post(&self, url: &str, method: &str, params: Value) -> Result<Value, BrokerError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let start = Instant::now();
        let result = self.post_once(url, &body).await;
        crate::metrics::observe_upstream_latency_ms(start.elapsed().as_millis(), result.is_ok());

        if let Err(e) = &result {
            tracing::debug!(method, error = %e, "Upstream RPC call failed");
        }
        result
    }

    async fn post_once(&self, url: &str, body: &JsonRpcRequest<'_>) -> Result<Value, BrokerError> {
        let resp = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| BrokerError::rpc(format!("RPC request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BrokerError::rpc(format!("RPC HTTP error: {}", status)));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| BrokerError::rpc(format!("Invalid RPC response: {}", e)))?;
        split_rpc_response(json)
    }

    async fn quantity(&self, url: &str, method: &str, params: Value) -> Result<U256, BrokerError> {
        let result = self.rpc_post(url, method, params).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| BrokerError::rpc(format!("{} returned a non-string result", method)))?;
        validate_balance(hex).map_err(|e| BrokerError::rpc(e.to_string()))
    }

    /// 补全缺省的 nonce 与费用字段
    async fn fill_draft(
        &self,
        url: &str,
        from: Address,
        mut draft: TransactionDraft,
    ) -> Result<TransactionDraft, BrokerError> {
        if draft.nonce.is_none() {
            let nonce = self
                .quantity(url, "eth_getTransactionCount", json!([from, "pending"]))
                .await?;
            draft.nonce = Some(nonce);
        }

        if draft.gas_price.is_none()
            && (draft.max_fee_per_gas.is_none() || draft.max_priority_fee_per_gas.is_none())
        {
            let gas_price = self.quantity(url, "eth_gasPrice", json!([])).await?;
            let priority = match draft.max_priority_fee_per_gas {
                Some(p) => p,
                None => self
                    .quantity(url, "eth_maxPriorityFeePerGas", json!([]))
                    .await
                    .unwrap_or(gas_price),
            };
            draft.max_priority_fee_per_gas = Some(priority);
            if draft.max_fee_per_gas.is_none() {
                draft.max_fee_per_gas =
                    Some(gas_price.saturating_mul(2.into()).saturating_add(priority));
            }
        }
        Ok(draft)
    }
}

/// 构造交易：给定 `gasPrice` 时为 legacy，否则为 EIP-1559；始终携带链 ID
pub fn build_transaction(
    draft: &TransactionDraft,
    from: Address,
    chain_id: u64,
) -> Result<TypedTransaction, BrokerError> {
    let to = draft.to_address()?;
    let data = draft.data.clone().map(Bytes::from);

    let tx: TypedTransaction = match draft.gas_price {
        Some(gas_price) => {
            let mut tx = TransactionRequest::new()
                .from(from)
                .value(draft.value)
                .gas_price(gas_price)
                .chain_id(chain_id);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            if let Some(data) = data {
                tx = tx.data(data);
            }
            if let Some(gas) = draft.gas {
                tx = tx.gas(gas);
            }
            if let Some(nonce) = draft.nonce {
                tx = tx.nonce(nonce);
            }
            tx.into()
        }
        None => {
            let mut tx = Eip1559TransactionRequest::new()
                .from(from)
                .value(draft.value)
                .chain_id(chain_id);
            if let Some(to) = to {
                tx = tx.to(to);
            }
            if let Some(data) = data {
                tx = tx.data(data);
            }
            if let Some(gas) = draft.gas {
                tx = tx.gas(gas);
            }
            if let Some(nonce) = draft.nonce {
                tx = tx.nonce(nonce);
            }
            if let Some(fee) = draft.max_fee_per_gas {
                tx = tx.max_fee_per_gas(fee);
            }
            if let Some(tip) = draft.max_priority_fee_per_gas {
                tx = tx.max_priority_fee_per_gas(tip);
            }
            tx.into()
        }
    };
    Ok(tx)
}

fn chain_id_u64(chain: &ChainInfo) -> Result<u64, BrokerError> {
    u64::try_from(chain.chain_id).map_err(|_| BrokerError::InvalidChainId)
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn get_balance(&self, chain: &ChainInfo, address: &str) -> Result<String, BrokerError> {
        let url = chain.primary_rpc_url()?;
        let wei = self
            .quantity(url, "eth_getBalance", json!([address, "latest"]))
            .await?;
        Ok(format_ether(wei))
    }

    async fn request(
        &self,
        chain: &ChainInfo,
        method: &str,
        params: Value,
    ) -> Result<Value, BrokerError> {
        let url = chain.primary_rpc_url()?;
        let params = if params.is_null() { json!([]) } else { params };
        self.rpc_post(url, method, params).await
    }

    async fn send_transaction(
        &self,
        chain: &ChainInfo,
        credential: &dyn Credential,
        draft: TransactionDraft,
    ) -> Result<String, BrokerError> {
        let url = chain.primary_rpc_url()?;
        let chain_id = chain_id_u64(chain)?;
        let from: Address = credential
            .address()
            .parse()
            .map_err(|_| BrokerError::InvalidFromAddress)?;

        let draft = self.fill_draft(url, from, draft).await?;
        let mut tx = build_transaction(&draft, from, chain_id)?;

        if tx.gas().is_none() {
            let estimate = serde_json::to_value(&tx)?;
            let gas = self.quantity(url, "eth_estimateGas", json!([estimate])).await?;
            tx.set_gas(gas);
        }

        let signature = credential
            .sign_transaction(&tx)
            .await
            .map_err(|e| BrokerError::Keystore(format!("{:#}", e)))?;
        let raw = tx.rlp_signed(&signature);
        let raw_hex = format!("0x{}", hex::encode(&raw));

        let result = self
            .rpc_post(url, "eth_sendRawTransaction", json!([raw_hex]))
            .await?;
        let hash = result
            .as_str()
            .ok_or_else(|| {
                BrokerError::rpc("eth_sendRawTransaction returned a non-string result")
            })?;
        let hash = validate_tx_hash(hash).map_err(|e| BrokerError::rpc(e.to_string()))?;

        tracing::info!(
            chain_id,
            tx_hash = %hash,
            "Transaction broadcast"
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from() -> Address {
        "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap()
    }

    #[test]
    fn test_build_eip1559_by_default() {
        let draft = TransactionDraft::native_transfer(
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
            U256::from(1_000u64),
        );
        let tx = build_transaction(&draft, from(), 84532).unwrap();

        assert!(matches!(tx, TypedTransaction::Eip1559(_)));
        assert_eq!(tx.chain_id().map(|c| c.as_u64()), Some(84532));
        assert_eq!(tx.value(), Some(&U256::from(1_000u64)));
        assert!(tx.gas().is_none());
    }

    #[test]
    fn test_build_legacy_with_gas_price() {
        let draft = TransactionDraft {
            gas_price: Some(U256::from(5u64)),
            gas: Some(U256::from(21_000u64)),
            nonce: Some(U256::from(7u64)),
            data: Some(vec![0xde, 0xad]),
            ..Default::default()
        };
        let tx = build_transaction(&draft, from(), 1).unwrap();

        assert!(matches!(tx, TypedTransaction::Legacy(_)));
        assert_eq!(tx.gas(), Some(&U256::from(21_000u64)));
        assert_eq!(tx.nonce(), Some(&U256::from(7u64)));
        assert_eq!(tx.value(), Some(&U256::zero()));
        assert!(tx.to().is_none());
    }

    #[test]
    fn test_build_rejects_bad_to() {
        let draft = TransactionDraft::native_transfer("not-an-address".to_string(), U256::one());
        assert!(matches!(
            build_transaction(&draft, from(), 1),
            Err(BrokerError::InvalidParams(_))
        ));
    }
}
