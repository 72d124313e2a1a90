//! 凭证管理（外部密码学协作方）
//!
//! 只持有单个活动凭证。私钥以 PBKDF2 + AES-256-GCM 加密后持久化，
//! 解锁后的凭证仅存在于内存中。

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use coins_bip39::{English, Mnemonic};
use ethers::{
    signers::{LocalWallet, MnemonicBuilder, Signer},
    types::{transaction::eip2718::TypedTransaction, Signature},
    utils::to_checksum,
};
use zeroize::Zeroizing;

use crate::infrastructure::encryption::{open_with_password, seal_with_password};

/// 解锁后的签名能力
#[async_trait]
pub trait Credential: Send + Sync {
    /// EIP-55 校验和地址
    fn address(&self) -> String;

    /// EIP-191 消息签名，返回 `0x` 十六进制
    async fn sign_message(&self, message: &[u8]) -> Result<String>;

    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature>;
}

/// 新建或导入的凭证
pub struct NewCredential {
    pub credential: Arc<dyn Credential>,
    pub encrypted_blob: String,
    /// 仅随机创建时存在
    pub mnemonic: Option<String>,
}

#[async_trait]
pub trait Keystore: Send + Sync {
    async fn create_random(&self, password: &str) -> Result<NewCredential>;
    async fn import_private_key(&self, private_key: &str, password: &str) -> Result<NewCredential>;
    async fn unlock(&self, encrypted_blob: &str, password: &str) -> Result<Arc<dyn Credential>>;
}

pub struct EthersCredential {
    wallet: LocalWallet,
}

impl EthersCredential {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

#[async_trait]
impl Credential for EthersCredential {
    fn address(&self) -> String {
        to_checksum(&self.wallet.address(), None)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<String> {
        let signature = self
            .wallet
            .sign_message(message)
            .await
            .context("Failed to sign message")?;
        Ok(format!("0x{}", signature))
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> Result<Signature> {
        let signer = match tx.chain_id() {
            Some(chain_id) => self.wallet.clone().with_chain_id(chain_id.as_u64()),
            None => self.wallet.clone(),
        };
        signer
            .sign_transaction(tx)
            .await
            .context("Failed to sign transaction")
    }
}

pub struct EthersKeystore {
    kdf_iterations: u32,
}

impl EthersKeystore {
    pub fn new(kdf_iterations: u32) -> Self {
        Self { kdf_iterations }
    }

    /// 加密私钥；KDF 在阻塞线程池中执行
    async fn seal(&self, wallet: &LocalWallet, password: &str) -> Result<String> {
        let secret = Zeroizing::new(wallet.signer().to_bytes().to_vec());
        let password = Zeroizing::new(password.to_string());
        let iterations = self.kdf_iterations;

        tokio::task::spawn_blocking(move || seal_with_password(&secret, &password, iterations))
            .await
            .context("Keystore task failed")?
    }
}

#[async_trait]
impl Keystore for EthersKeystore {
    async fn create_random(&self, password: &str) -> Result<NewCredential> {
        let phrase = {
            let mut rng = rand::thread_rng();
            let mnemonic = Mnemonic::<English>::new_with_count(&mut rng, 12)
                .map_err(|e| anyhow!("Failed to generate mnemonic: {}", e))?;
            Zeroizing::new(mnemonic.to_phrase())
        };

        let wallet = MnemonicBuilder::<English>::default()
            .phrase(phrase.as_str())
            .build()
            .map_err(|e| anyhow!("Failed to derive wallet: {}", e))?;

        let encrypted_blob = self.seal(&wallet, password).await?;
        Ok(NewCredential {
            credential: Arc::new(EthersCredential::new(wallet)),
            encrypted_blob,
            mnemonic: Some(phrase.to_string()),
        })
    }

    async fn import_private_key(&self, private_key: &str, password: &str) -> Result<NewCredential> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| anyhow!("Invalid private key"))?;

        let encrypted_blob = self.seal(&wallet, password).await?;
        Ok(NewCredential {
            credential: Arc::new(EthersCredential::new(wallet)),
            encrypted_blob,
            mnemonic: None,
        })
    }

    async fn unlock(&self, encrypted_blob: &str, password: &str) -> Result<Arc<dyn Credential>> {
        let blob = encrypted_blob.to_string();
        let password = Zeroizing::new(password.to_string());

        let secret = tokio::task::spawn_blocking(move || open_with_password(&blob, &password))
            .await
            .context("Keystore task failed")??;
        let secret = Zeroizing::new(secret);

        let wallet = LocalWallet::from_bytes(&secret)
            .map_err(|e| anyhow!("Corrupt credential: {}", e))?;
        Ok(Arc::new(EthersCredential::new(wallet)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hardhat 默认账户 #0
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[tokio::test]
    async fn test_import_and_unlock() {
        let keystore = EthersKeystore::new(1_000);
        let created = keystore.import_private_key(KEY, "pw-123456").await.unwrap();
        assert_eq!(created.credential.address(), ADDRESS);
        assert!(created.mnemonic.is_none());
        assert!(!created.encrypted_blob.contains(&KEY[2..]));

        let unlocked = keystore
            .unlock(&created.encrypted_blob, "pw-123456")
            .await
            .unwrap();
        assert_eq!(unlocked.address(), ADDRESS);

        let err = keystore
            .unlock(&created.encrypted_blob, "wrong")
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Invalid password");
    }

    #[tokio::test]
    async fn test_import_rejects_garbage() {
        let keystore = EthersKeystore::new(1_000);
        assert!(keystore.import_private_key("0x1234", "pw").await.is_err());
    }

    #[tokio::test]
    async fn test_create_random_returns_phrase() {
        let keystore = EthersKeystore::new(1_000);
        let created = keystore.create_random("pw").await.unwrap();
        let phrase = created.mnemonic.unwrap();
        assert_eq!(phrase.split_whitespace().count(), 12);

        let unlocked = keystore.unlock(&created.encrypted_blob, "pw").await.unwrap();
        assert_eq!(unlocked.address(), created.credential.address());
    }

    #[tokio::test]
    async fn test_sign_message_format() {
        let credential = EthersCredential::new(KEY.parse().unwrap());
        let sig = credential.sign_message(b"hello").await.unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 2 + 65 * 2);
    }
}
