//! 页面侧 EIP-1193 方法分类
//!
//! 每个入站方法被解析为一个封闭枚举，调度器对其做穷尽匹配；
//! 未识别的方法只能显式落入 `Passthrough`。

use ethers::types::{NameOrAddress, U256};
use serde::Deserialize;
use serde_json::Value;

use crate::error::BrokerError;

/// 方法类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodCategory {
    FreeRead,
    ConnectionGatedRead,
    Connect,
    NetworkSwitch,
    Signing,
    Transaction,
    Passthrough,
}

impl MethodCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodCategory::FreeRead => "free_read",
            MethodCategory::ConnectionGatedRead => "connection_gated_read",
            MethodCategory::Connect => "connect",
            MethodCategory::NetworkSwitch => "network_switch",
            MethodCategory::Signing => "signing",
            MethodCategory::Transaction => "transaction",
            MethodCategory::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMethod {
    ChainId,
    NetVersion,
    Accounts,
    RequestAccounts,
    SwitchChain,
    PersonalSign,
    EthSign,
    SendTransaction,
    /// 需要连接但本实现不提供的签名方法
    UnsupportedSigning(String),
    Passthrough(String),
}

impl RpcMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "eth_chainId" => RpcMethod::ChainId,
            "net_version" => RpcMethod::NetVersion,
            "eth_accounts" => RpcMethod::Accounts,
            "eth_requestAccounts" => RpcMethod::RequestAccounts,
            "wallet_switchEthereumChain" => RpcMethod::SwitchChain,
            "personal_sign" => RpcMethod::PersonalSign,
            "eth_sign" => RpcMethod::EthSign,
            "eth_sendTransaction" => RpcMethod::SendTransaction,
            "eth_signTransaction" | "eth_signTypedData" | "eth_signTypedData_v3"
            | "eth_signTypedData_v4" => RpcMethod::UnsupportedSigning(method.to_string()),
            other => RpcMethod::Passthrough(other.to_string()),
        }
    }

    pub fn category(&self) -> MethodCategory {
        match self {
            RpcMethod::ChainId | RpcMethod::NetVersion => MethodCategory::FreeRead,
            RpcMethod::Accounts => MethodCategory::ConnectionGatedRead,
            RpcMethod::RequestAccounts => MethodCategory::Connect,
            RpcMethod::SwitchChain => MethodCategory::NetworkSwitch,
            RpcMethod::PersonalSign | RpcMethod::EthSign | RpcMethod::UnsupportedSigning(_) => {
                MethodCategory::Signing
            }
            RpcMethod::SendTransaction => MethodCategory::Transaction,
            RpcMethod::Passthrough(_) => MethodCategory::Passthrough,
        }
    }

    /// 未连接时必须立即拒绝的方法
    pub fn requires_connection(&self) -> bool {
        matches!(
            self.category(),
            MethodCategory::Signing | MethodCategory::Transaction
        )
    }
}

/// 解析数量字段：`"0x.."`、十进制字符串或 JSON 数字
///
/// `null` 视为缺省
pub fn parse_quantity(value: &Value) -> Result<Option<U256>, BrokerError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(|v| Some(U256::from(v)))
            .ok_or_else(|| BrokerError::InvalidParams(format!("invalid quantity: {}", n))),
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
                Some(_) => None,
                None if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                    U256::from_dec_str(s).ok()
                }
                None => None,
            };
            parsed
                .map(Some)
                .ok_or_else(|| BrokerError::InvalidParams(format!("invalid quantity: {}", s)))
        }
        other => Err(BrokerError::InvalidParams(format!(
            "invalid quantity: {}",
            other
        ))),
    }
}

fn optional_quantity(value: &Option<Value>) -> Result<Option<U256>, BrokerError> {
    match value {
        Some(v) => parse_quantity(v),
        None => Ok(None),
    }
}

/// `eth_sendTransaction` 的第一个参数
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    /// 非字符串视为不匹配
    #[serde(default)]
    pub from: Option<Value>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub gas: Option<Value>,
    #[serde(default)]
    pub gas_price: Option<Value>,
    #[serde(default)]
    pub max_fee_per_gas: Option<Value>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<Value>,
    #[serde(default)]
    pub nonce: Option<Value>,
}

/// 规范化后的待发送交易
///
/// 除 `value`（缺省为 0）外，缺省字段保持缺省，由链客户端补全
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionDraft {
    pub to: Option<String>,
    pub value: U256,
    pub data: Option<Vec<u8>>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub nonce: Option<U256>,
}

impl TransactionParams {
    pub fn from_params(params: Option<&Value>) -> Result<Self, BrokerError> {
        match params.and_then(|p| p.get(0)) {
            Some(first) if first.is_object() => Ok(serde_json::from_value(first.clone())?),
            _ => Err(BrokerError::InvalidParams(
                "expected a transaction object".to_string(),
            )),
        }
    }

    /// `from` 与活动地址一致（忽略大小写）
    pub fn from_matches(&self, address: &str) -> bool {
        match &self.from {
            Some(Value::String(from)) => from.trim().eq_ignore_ascii_case(address),
            _ => false,
        }
    }

    /// 审批界面展示用的 value，缺省为 `0x0`
    pub fn display_value(&self) -> Value {
        match &self.value {
            Some(v) if !v.is_null() => v.clone(),
            _ => Value::String("0x0".to_string()),
        }
    }

    pub fn display_data(&self) -> String {
        self.data.clone().unwrap_or_else(|| "0x".to_string())
    }

    pub fn into_draft(self) -> Result<TransactionDraft, BrokerError> {
        let data = match self.data.as_deref() {
            None => None,
            Some(d) => {
                let stripped = d.strip_prefix("0x").unwrap_or(d);
                Some(hex::decode(stripped).map_err(|e| {
                    BrokerError::InvalidParams(format!("invalid data: {}", e))
                })?)
            }
        };

        Ok(TransactionDraft {
            value: optional_quantity(&self.value)?.unwrap_or_default(),
            gas: optional_quantity(&self.gas)?,
            gas_price: optional_quantity(&self.gas_price)?,
            max_fee_per_gas: optional_quantity(&self.max_fee_per_gas)?,
            max_priority_fee_per_gas: optional_quantity(&self.max_priority_fee_per_gas)?,
            nonce: optional_quantity(&self.nonce)?,
            to: self.to,
            data,
        })
    }
}

impl TransactionDraft {
    /// 原生币转账
    pub fn native_transfer(to: String, value: U256) -> Self {
        Self {
            to: Some(to),
            value,
            ..Default::default()
        }
    }

    pub fn to_address(&self) -> Result<Option<NameOrAddress>, BrokerError> {
        self.to
            .as_deref()
            .map(|to| {
                to.trim()
                    .parse::<ethers::types::Address>()
                    .map(NameOrAddress::Address)
                    .map_err(|_| BrokerError::InvalidParams(format!("invalid to address: {}", to)))
            })
            .transpose()
    }
}

/// 签名消息：`0x` 前缀按十六进制字节解析，否则按 UTF-8 文本
pub fn sign_message_bytes(params: Option<&Value>) -> Result<Vec<u8>, BrokerError> {
    match params.and_then(|p| p.get(0)) {
        Some(Value::String(s)) => match s.strip_prefix("0x") {
            Some(hex_body) => hex::decode(hex_body)
                .map_err(|e| BrokerError::InvalidParams(format!("invalid hex message: {}", e))),
            None => Ok(s.as_bytes().to_vec()),
        },
        _ => Ok(Vec::new()),
    }
}
