//! Token sealing using AES-256-GCM.
//!
//! Access and refresh tokens are stored as a single opaque [`SealedToken`]
//! value: a version byte, a per-seal random nonce, and the ciphertext+tag,
//! bound to the owning credential through additional authenticated data.
//! Call sites never touch nonce or tag fields individually.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_SEALED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("sealing failed: {0}")]
    SealFailed(String),
    #[error("opening failed: {0}")]
    OpenFailed(String),
    #[error("invalid sealed token format")]
    InvalidFormat,
    #[error("empty sealed token")]
    Empty,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::SealFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An encrypted token as persisted at rest.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedToken(Vec<u8>);

impl std::fmt::Debug for SealedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedToken")
            .field("len", &self.0.len())
            .finish()
    }
}

impl SealedToken {
    /// Seal a plaintext under the given key and AAD context.
    pub fn seal(key: &CryptoKey, aad: &[u8], plaintext: &[u8]) -> Result<Self, CryptoError> {
        let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        let cipher = Aes256Gcm::new(cipher_key);

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

        let mut framed = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
        framed.push(VERSION_SEALED);
        framed.extend_from_slice(&nonce);
        framed.append(&mut ciphertext);

        Ok(Self(framed))
    }

    /// Reconstruct a sealed token from its persisted bytes, validating framing.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::Empty);
        }
        if bytes[0] != VERSION_SEALED || bytes.len() < MIN_SEALED_LEN {
            return Err(CryptoError::InvalidFormat);
        }
        Ok(Self(bytes))
    }

    /// Open the sealed token back into its plaintext bytes.
    pub fn open(&self, key: &CryptoKey, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Nonce::from_slice(&self.0[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
        let ciphertext = &self.0[VERSION_FIELD_LEN + NONCE_LEN..];

        let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        let cipher = Aes256Gcm::new(cipher_key);

        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::OpenFailed(e.to_string()))
    }

    /// Open the sealed token into a UTF-8 string.
    pub fn open_string(&self, key: &CryptoKey, aad: &[u8]) -> Result<String, CryptoError> {
        let bytes = self.open(key, aad)?;
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::OpenFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Borrow the persisted form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the persisted form.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// AAD context for a credential: binds the ciphertext to its owner row so a
/// sealed token copied between creators or platforms refuses to open.
pub fn credential_aad(creator_id: Uuid, platform: &str) -> String {
    format!("{}|{}", creator_id, platform)
}
