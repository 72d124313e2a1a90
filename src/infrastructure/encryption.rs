//! AES-256-GCM 加密/解密模块
//! 用于凭证静态加密：PBKDF2-SHA256 由密码派生密钥，密文以 JSON 封装持久化

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SALT_LENGTH: usize = 16; // 16字节盐值
const KEY_LENGTH: usize = 32; // 32字节密钥（AES-256）
const NONCE_LENGTH: usize = 12;
const BLOB_VERSION: u8 = 1;

/// 加密数据
///
/// 返回 nonce (12字节) + ciphertext
pub fn encrypt_data(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LENGTH {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// 解密数据（nonce + ciphertext）
pub fn decrypt_data(encrypted: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LENGTH {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    if encrypted.len() < NONCE_LENGTH {
        return Err(anyhow!("Encrypted data too short"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Nonce::from_slice(&encrypted[..NONCE_LENGTH]);
    let ciphertext = &encrypted[NONCE_LENGTH..];

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))
}

/// 派生密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if salt.len() != SALT_LENGTH {
            return Err(anyhow!("Salt must be {} bytes", SALT_LENGTH));
        }
        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
        Ok(Self { key })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

/// 持久化的加密凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    pub version: u8,
    pub kdf: String,
    pub iterations: u32,
    /// hex
    pub salt: String,
    /// hex(nonce + ciphertext)
    pub ciphertext: String,
}

/// 以密码加密并序列化为 JSON 字符串
pub fn seal_with_password(plaintext: &[u8], password: &str, iterations: u32) -> Result<String> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = EncryptionKey::derive(password, &salt, iterations)?;
    let encrypted = encrypt_data(plaintext, key.as_slice())?;

    let blob = SealedBlob {
        version: BLOB_VERSION,
        kdf: "pbkdf2-sha256".to_string(),
        iterations,
        salt: hex::encode(salt),
        ciphertext: hex::encode(encrypted),
    };
    Ok(serde_json::to_string(&blob)?)
}

/// 解析 JSON 封装并以密码解密；密码错误时返回错误
pub fn open_with_password(blob_json: &str, password: &str) -> Result<Vec<u8>> {
    let blob: SealedBlob =
        serde_json::from_str(blob_json).map_err(|e| anyhow!("Malformed encrypted blob: {}", e))?;

    if blob.version != BLOB_VERSION {
        return Err(anyhow!("Unsupported blob version: {}", blob.version));
    }

    let salt = hex::decode(&blob.salt).map_err(|e| anyhow!("Invalid salt: {}", e))?;
    let encrypted =
        hex::decode(&blob.ciphertext).map_err(|e| anyhow!("Invalid ciphertext: {}", e))?;

    let key = EncryptionKey::derive(password, &salt, blob.iterations)?;
    decrypt_data(&encrypted, key.as_slice()).map_err(|_| anyhow!("Invalid password"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = b"01234567890123456789012345678901"; // 32 bytes
        let data = b"Hello, World!";

        let encrypted = encrypt_data(data, key).unwrap();
        assert_ne!(encrypted, data);

        let decrypted = decrypt_data(&encrypted, key).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_seal_and_open() {
        let sealed = seal_with_password(b"secret key bytes", "hunter22", 1_000).unwrap();
        assert!(!sealed.contains("secret key bytes"));

        let opened = open_with_password(&sealed, "hunter22").unwrap();
        assert_eq!(opened, b"secret key bytes");

        let err = open_with_password(&sealed, "wrong").unwrap_err();
        assert_eq!(err.to_string(), "Invalid password");
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(open_with_password("not json", "pw").is_err());
    }
}
