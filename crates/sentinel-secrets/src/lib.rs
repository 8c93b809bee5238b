#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **sentinel-secrets** – AES-256-GCM envelope for secrets at rest.
//!
//! Channel credentials and API keys persisted by the platform are stored as
//! `base64(iv || ciphertext || tag)` with a 12-byte random IV and a 16-byte
//! GCM tag. The key comes from the `DATA_ENCRYPTION_KEY` environment
//! variable as exactly 64 hex characters; a missing or malformed key is a
//! startup error, and any integrity failure on decrypt is a hard error.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use secrecy::{ExposeSecret, Secret};

/// Environment variable holding the hex-encoded 32-byte key.
pub const KEY_ENV_VAR: &str = "DATA_ENCRYPTION_KEY";

/// Length of the GCM nonce prefix in the envelope.
const IV_LEN: usize = 12;

/// Length of the GCM authentication tag suffix in the envelope.
const TAG_LEN: usize = 16;

/// Errors raised by the secret cipher.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// `DATA_ENCRYPTION_KEY` is not set.
    #[error("{KEY_ENV_VAR} is not set")]
    KeyMissing,
    /// The key is not 64 hex characters.
    #[error("{KEY_ENV_VAR} must be exactly 64 hex characters")]
    KeyMalformed,
    /// The envelope is not valid base64.
    #[error("encrypted value is not valid base64")]
    Encoding,
    /// The envelope is too short to contain an IV and tag.
    #[error("encrypted value is truncated")]
    Truncated,
    /// Decryption failed; the value was tampered with or the key is wrong.
    #[error("integrity check failed")]
    Integrity,
    /// The decrypted bytes are not UTF-8.
    #[error("decrypted value is not valid UTF-8")]
    NotUtf8,
}

/// AES-256-GCM cipher bound to the configured data-encryption key.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Build a cipher from the `DATA_ENCRYPTION_KEY` environment variable.
    ///
    /// Fails fast on a missing or malformed key so misconfiguration is
    /// caught at startup, not at the first persisted secret.
    pub fn from_env() -> Result<Self, SecretError> {
        let hex_key = std::env::var(KEY_ENV_VAR).map_err(|_| SecretError::KeyMissing)?;
        Self::from_hex_key(Secret::new(hex_key))
    }

    /// Build a cipher from an explicit hex-encoded key.
    pub fn from_hex_key(hex_key: Secret<String>) -> Result<Self, SecretError> {
        let raw = hex_key.expose_secret();
        if raw.len() != 64 {
            return Err(SecretError::KeyMalformed);
        }
        let key_bytes = hex::decode(raw).map_err(|_| SecretError::KeyMalformed)?;
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt `plaintext` into the `base64(iv || ciphertext || tag)`
    /// envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecretError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::Integrity)?;

        let mut envelope = Vec::with_capacity(IV_LEN + ciphertext.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Open an envelope produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, SecretError> {
        let envelope = BASE64.decode(encoded).map_err(|_| SecretError::Encoding)?;
        if envelope.len() < IV_LEN + TAG_LEN {
            return Err(SecretError::Truncated);
        }
        let (iv, ciphertext) = envelope.split_at(IV_LEN);
        let nonce = Nonce::from_slice(iv);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| SecretError::Integrity)?;
        String::from_utf8(plaintext).map_err(|_| SecretError::NotUtf8)
    }
}
