//! 键值持久化
//!
//! 值以 JSON 存储；`MemoryKvStore` 用于测试与临时运行，`RedisKvStore` 使用 MultiplexedConnection

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// 读取并反序列化；键不存在返回 `None`
pub async fn load<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match kv.get(key).await? {
        Some(value) => {
            let parsed = serde_json::from_value(value)
                .with_context(|| format!("Failed to decode stored value: {}", key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub async fn save<T: Serialize + Sync>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_value(value)?;
    kv.set(key, json).await
}

#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisKvStore {
    client: redis::Client,
}

impl RedisKvStore {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> Result<String, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(s) => Ok(Some(
                serde_json::from_str(&s).with_context(|| format!("Corrupt value at {}", key))?,
            )),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value.to_string())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let kv = MemoryKvStore::new();
        assert!(kv.get("missing").await.unwrap().is_none());

        kv.set("a", json!({"x": 1})).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_typed_load_save() {
        let kv = MemoryKvStore::new();
        save(&kv, "s", &Sample { n: 7 }).await.unwrap();
        let loaded: Option<Sample> = load(&kv, "s").await.unwrap();
        assert_eq!(loaded, Some(Sample { n: 7 }));

        kv.set("bad", json!("nope")).await.unwrap();
        assert!(load::<Sample>(&kv, "bad").await.is_err());
    }
}
