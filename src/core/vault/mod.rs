use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::Result;
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;
use std::fmt;
use tracing::warn;

type HmacSha256 = hmac::Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Marketplace session cookie in plaintext. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct GoldenKey(String);

impl GoldenKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Replace every occurrence of the key inside `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, "[redacted]")
    }
}

impl fmt::Debug for GoldenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GoldenKey([redacted])")
    }
}

impl fmt::Display for GoldenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Symmetric AES-256-GCM vault for credentials at rest.
pub struct CredentialVault {
    cipher: Aes256Gcm,
    ephemeral: bool,
}

/// Turn `DATA_ENCRYPTION_KEY` into 256 bits of key material.
/// A base64 value decoding to exactly 32 bytes is used as-is; anything
/// else is treated as a passphrase and run through HMAC-SHA256.
fn derive_key(material: &str) -> [u8; 32] {
    let material = material.trim();
    for engine in [
        &base64::engine::general_purpose::STANDARD,
        &base64::engine::general_purpose::URL_SAFE,
    ] {
        if let Ok(bytes) = engine.decode(material) {
            if bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                return key;
            }
        }
    }

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"funpay-plus-vault-v1")
        .expect("HMAC can take key of any size");
    mac.update(material.as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

impl CredentialVault {
    pub fn from_key(key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self {
            cipher,
            ephemeral: false,
        }
    }

    /// Build the vault from the configured key. Without one an ephemeral
    /// key is generated; tokens stored by earlier runs will not decrypt.
    pub fn from_material(material: Option<&str>) -> Self {
        match material {
            Some(material) => Self::from_key(derive_key(material)),
            None => {
                warn!(
                    "DATA_ENCRYPTION_KEY is not set; using an ephemeral key. Stored golden keys will fail to decrypt after restart."
                );
                let key: [u8; 32] = rand::random();
                Self {
                    ephemeral: true,
                    ..Self::from_key(key)
                }
            }
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() <= NONCE_LEN {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }

    pub fn seal_golden_key(&self, key: &GoldenKey) -> Result<String> {
        self.encrypt(key.expose())
    }

    pub fn open_golden_key(&self, token: &str) -> Result<GoldenKey> {
        self.decrypt(token).map(GoldenKey::new)
    }
}
