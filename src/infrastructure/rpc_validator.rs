// RPC响应校验模块 - 拆分 JSON-RPC 信封并校验链上返回值

use anyhow::{Context, Result};
use ethers::types::U256;
use serde_json::Value;

use crate::error::BrokerError;

/// 拆分 JSON-RPC 响应：返回 `result`，或原样返回节点的 `error`
pub fn split_rpc_response(json: Value) -> Result<Value, BrokerError> {
    if let Some(version) = json.get("jsonrpc") {
        if version.as_str() != Some("2.0") {
            return Err(BrokerError::rpc(format!(
                "Unsupported JSON-RPC version: {}",
                version
            )));
        }
    }

    if let Some(error) = json.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64());
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Err(BrokerError::Rpc { code, message });
    }

    match json {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| BrokerError::rpc("Missing result field in RPC response")),
        _ => Err(BrokerError::rpc("Malformed RPC response")),
    }
}

/// 验证RPC返回的余额值（wei）
pub fn validate_balance(balance_hex: &str) -> Result<U256> {
    let balance_hex = balance_hex.trim_start_matches("0x");

    // 最多32字节 = 64个十六进制字符
    if balance_hex.is_empty() || balance_hex.len() > 64 {
        anyhow::bail!("Invalid balance hex length: {}", balance_hex.len());
    }

    U256::from_str_radix(balance_hex, 16)
        .ok()
        .context("Failed to parse balance from hex")
}

/// 验证交易哈希格式
pub fn validate_tx_hash(tx_hash: &str) -> Result<String> {
    let hash = tx_hash.trim_start_matches("0x");

    // 32字节 = 64个十六进制字符
    if hash.len() != 64 {
        anyhow::bail!(
            "Invalid transaction hash length: expected 64, got {}",
            hash.len()
        );
    }

    if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("Invalid transaction hash format: contains non-hex characters");
    }

    Ok(format!("0x{}", hash.to_lowercase()))
}
