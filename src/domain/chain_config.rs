//! 网络配置模块
//!
//! 定义内置 EVM 网络表（主网/测试网两种模式）以及链 ID、URL 的解析与规范化

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// JavaScript 安全整数上限，页面侧以 number 表示链 ID
pub const MAX_SAFE_CHAIN_ID: i64 = 9_007_199_254_740_991;

/// 网络模式（两种模式互斥）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Mainnet,
    #[default]
    Testnet,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Mainnet => "mainnet",
            NetworkMode::Testnet => "testnet",
        }
    }

    /// 内置网络，按固定展示顺序
    pub fn builtin_chains(&self) -> &'static [ChainInfo] {
        match self {
            NetworkMode::Mainnet => MAINNET_CHAINS.as_slice(),
            NetworkMode::Testnet => TESTNET_CHAINS.as_slice(),
        }
    }

    pub fn default_chain_id(&self) -> i64 {
        match self {
            NetworkMode::Mainnet => 43114,
            NetworkMode::Testnet => 11155111,
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, NetworkMode::Testnet)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(NetworkMode::Mainnet),
            "testnet" => Ok(NetworkMode::Testnet),
            other => Err(anyhow::anyhow!("Invalid network mode: {}", other)),
        }
    }
}

/// 网络定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    /// EIP-155 链 ID
    pub chain_id: i64,
    pub name: String,
    pub native_symbol: String,
    /// 第一个为默认端点
    pub rpc_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_explorer_url: Option<String>,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub is_custom: bool,
}

impl ChainInfo {
    fn builtin(
        chain_id: i64,
        name: &str,
        native_symbol: &str,
        rpc_url: &str,
        explorer: &str,
        is_testnet: bool,
    ) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            native_symbol: native_symbol.to_string(),
            rpc_urls: vec![rpc_url.to_string()],
            block_explorer_url: Some(explorer.to_string()),
            is_testnet,
            is_custom: false,
        }
    }

    /// 主 RPC 端点
    pub fn primary_rpc_url(&self) -> Result<&str, BrokerError> {
        self.rpc_urls
            .first()
            .map(String::as_str)
            .ok_or_else(|| {
                BrokerError::Internal(format!("Chain {} has no RPC URL", self.chain_id))
            })
    }

    pub fn explorer_tx_url(&self, tx_hash: &str) -> Option<String> {
        self.block_explorer_url
            .as_deref()
            .map(|base| format!("{}/tx/{}", normalize_url(base), tx_hash))
    }

    pub fn explorer_address_url(&self, address: &str) -> Option<String> {
        self.block_explorer_url
            .as_deref()
            .map(|base| format!("{}/address/{}", normalize_url(base), address))
    }
}

static MAINNET_CHAINS: Lazy<Vec<ChainInfo>> = Lazy::new(|| {
    vec![
        ChainInfo::builtin(
            1,
            "Ethereum",
            "ETH",
            "https://cloudflare-eth.com",
            "https://etherscan.io",
            false,
        ),
        ChainInfo::builtin(
            8453,
            "Base",
            "ETH",
            "https://mainnet.base.org",
            "https://basescan.org",
            false,
        ),
        ChainInfo::builtin(
            42161,
            "Arbitrum One",
            "ETH",
            "https://arb1.arbitrum.io/rpc",
            "https://arbiscan.io",
            false,
        ),
        ChainInfo::builtin(
            137,
            "Polygon",
            "MATIC",
            "https://polygon-rpc.com",
            "https://polygonscan.com",
            false,
        ),
        ChainInfo::builtin(
            43114,
            "Avalanche C-Chain",
            "AVAX",
            "https://api.avax.network/ext/bc/C/rpc",
            "https://snowtrace.io",
            false,
        ),
    ]
});

static TESTNET_CHAINS: Lazy<Vec<ChainInfo>> = Lazy::new(|| {
    vec![
        ChainInfo::builtin(
            11155111,
            "Ethereum Sepolia",
            "ETH",
            "https://rpc.sepolia.org",
            "https://sepolia.etherscan.io",
            true,
        ),
        ChainInfo::builtin(
            84532,
            "Base Sepolia",
            "ETH",
            "https://sepolia.base.org",
            "https://sepolia.basescan.org",
            true,
        ),
        ChainInfo::builtin(
            421614,
            "Arbitrum Sepolia",
            "ETH",
            "https://sepolia-rollup.arbitrum.io/rpc",
            "https://sepolia.arbiscan.io",
            true,
        ),
        ChainInfo::builtin(
            80002,
            "Polygon Amoy",
            "POL",
            "https://rpc-amoy.polygon.technology",
            "https://amoy.polygonscan.com",
            true,
        ),
        ChainInfo::builtin(
            43113,
            "Avalanche Fuji C-Chain",
            "AVAX",
            "https://api.avax-test.network/ext/bc/C/rpc",
            "https://testnet.snowtrace.io",
            true,
        ),
    ]
});

/// 非 EVM 占位网络（仅展示，不可用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NonEvmChain {
    pub key: &'static str,
    pub name: &'static str,
    pub enabled: bool,
}

pub const NON_EVM_CHAINS: &[NonEvmChain] = &[NonEvmChain {
    key: "bitcoin",
    name: "Bitcoin",
    enabled: false,
}];

/// 链 ID 编码为 `0x` + 小写十六进制
pub fn to_hex_chain_id(chain_id: i64) -> Result<String, BrokerError> {
    if chain_id <= 0 || chain_id > MAX_SAFE_CHAIN_ID {
        return Err(BrokerError::MalformedChainId(chain_id.to_string()));
    }
    Ok(format!("0x{:x}", chain_id))
}

/// 解析用户输入的链 ID，支持 `"8453"` 与 `"0x2105"`
pub fn parse_chain_id(input: &str) -> Result<i64, BrokerError> {
    let v = input.trim();
    if v.is_empty() {
        return Err(BrokerError::MalformedChainId(input.to_string()));
    }

    let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => v.parse::<i64>(),
    };

    parsed.map_err(|_| BrokerError::MalformedChainId(input.to_string()))
}

/// 去除首尾空白及末尾斜杠
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

pub fn is_valid_http_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_chain_id() {
        assert_eq!(to_hex_chain_id(1).unwrap(), "0x1");
        assert_eq!(to_hex_chain_id(8453).unwrap(), "0x2105");
        assert!(to_hex_chain_id(0).is_err());
        assert!(to_hex_chain_id(-5).is_err());
        assert!(to_hex_chain_id(MAX_SAFE_CHAIN_ID + 1).is_err());
    }

    #[test]
    fn test_parse_chain_id() {
        assert_eq!(parse_chain_id("0x2105").unwrap(), 8453);
        assert_eq!(parse_chain_id("0X89").unwrap(), 137);
        assert_eq!(parse_chain_id(" 137 ").unwrap(), 137);
        assert!(parse_chain_id("").is_err());
        assert!(parse_chain_id("base").is_err());
        assert!(parse_chain_id("1.5").is_err());
    }

    #[test]
    fn test_normalize_and_validate_url() {
        assert_eq!(normalize_url(" https://rpc.example.org/// "), "https://rpc.example.org");
        assert!(is_valid_http_url("https://rpc.example.org"));
        assert!(is_valid_http_url("http://localhost:8545"));
        assert!(!is_valid_http_url("ws://localhost:8546"));
        assert!(!is_valid_http_url("not a url"));
    }

    #[test]
    fn test_builtin_tables() {
        let mainnet = NetworkMode::Mainnet.builtin_chains();
        let ids: Vec<i64> = mainnet.iter().map(|c| c.chain_id).collect();
        assert_eq!(ids, vec![1, 8453, 42161, 137, 43114]);
        assert!(mainnet.iter().all(|c| !c.is_testnet && !c.is_custom));

        let testnet = NetworkMode::Testnet.builtin_chains();
        assert!(testnet
            .iter()
            .any(|c| c.chain_id == NetworkMode::Testnet.default_chain_id()));
        assert!(testnet.iter().all(|c| c.is_testnet));
    }

    #[test]
    fn test_explorer_links() {
        let eth = &NetworkMode::Mainnet.builtin_chains()[0];
        assert_eq!(
            eth.explorer_tx_url("0xabc").as_deref(),
            Some("https://etherscan.io/tx/0xabc")
        );
        assert_eq!(
            eth.explorer_address_url("0xdef").as_deref(),
            Some("https://etherscan.io/address/0xdef")
        );
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("MAINNET".parse::<NetworkMode>().unwrap(), NetworkMode::Mainnet);
        assert_eq!(NetworkMode::default(), NetworkMode::Testnet);
        assert!("devnet".parse::<NetworkMode>().is_err());
    }
}
