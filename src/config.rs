//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::chain_config::{is_valid_http_url, NetworkMode};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 网络模式配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mode: NetworkMode,
}

/// 审批流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// 审批界面地址，打开时追加 `?requestId=<id>`
    #[serde(default = "default_approval_url")]
    pub approval_url: String,
    /// 未设置时请求永不过期
    #[serde(default)]
    pub approval_timeout_secs: Option<u64>,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

/// 持久化配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 未设置时使用内存存储
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8787".into()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: std::env::var("NETWORK_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}

fn default_approval_url() -> String {
    std::env::var("BROKER_APPROVAL_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8787/approval".into())
}

fn default_kdf_iterations() -> u32 {
    std::env::var("KEYSTORE_KDF_ITERATIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            approval_url: default_approval_url(),
            approval_timeout_secs: std::env::var("BROKER_APPROVAL_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|&v: &u64| v > 0),
            kdf_iterations: default_kdf_iterations(),
        }
    }
}

impl BrokerConfig {
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            network: NetworkConfig::default(),
            broker: BrokerConfig::default(),
            storage: StorageConfig::from_env(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        if !is_valid_http_url(&self.broker.approval_url) {
            anyhow::bail!("BROKER_APPROVAL_URL must be a valid http(s) URL");
        }

        if self.broker.kdf_iterations == 0 {
            anyhow::bail!("KEYSTORE_KDF_ITERATIONS must be positive");
        }

        if let Some(url) = &self.storage.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                anyhow::bail!("REDIS_URL must start with redis:// or rediss://");
            }
        }

        Ok(())
    }
}
