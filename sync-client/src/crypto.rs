//! Cryptographic primitives for todo-sync.
//!
//! This module provides:
//! - PBKDF2-HMAC-SHA256 key derivation from the sync code
//! - AES-256-GCM sealing of snapshots with random 96-bit nonces
//!
//! # Security Notes
//!
//! - Two devices converge on the same key from the textual sync code alone;
//!   there is no key-exchange round trip, so the salt is fixed.
//! - The AEAD tag check is the security boundary: a failed check is reported
//!   as [`CryptoError::Authentication`], never as a decode error.
//! - 96-bit nonces are drawn fresh per encryption from the OS CSPRNG.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::Sha256;
use sync_types::{EncryptedEnvelope, SyncCode, SyncSnapshot, NONCE_SIZE};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key size for AES-256-GCM (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// PBKDF2 work factor.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Application salt shared by every device.
pub const KEY_SALT: &[u8] = b"todo-sync-salt";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tag mismatch: wrong sync code, corrupted transit, or tampering.
    #[error("decryption failed: authentication error")]
    Authentication,

    /// The payload authenticated but is not a well-formed snapshot, or the
    /// envelope itself could not be parsed.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Symmetric key derived from a sync code.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SyncKey([u8; KEY_SIZE]);

impl SyncKey {
    /// Derive the key for `code`. Deterministic; takes ~100k HMAC rounds.
    pub fn derive(code: &SyncCode) -> Self {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(code.as_bytes(), KEY_SALT, PBKDF2_ROUNDS, &mut key);
        Self(key)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }

    /// Encrypt raw bytes with a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        Ok(EncryptedEnvelope { nonce, ciphertext })
    }

    /// Decrypt raw bytes, verifying the tag.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
        self.cipher()?
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| CryptoError::Authentication)
    }

    /// Serialize and encrypt a snapshot.
    pub fn seal(&self, snapshot: &SyncSnapshot) -> Result<EncryptedEnvelope, CryptoError> {
        let plaintext = snapshot
            .to_json()
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        self.encrypt(&plaintext)
    }

    /// Decrypt and parse a snapshot.
    pub fn open(&self, envelope: &EncryptedEnvelope) -> Result<SyncSnapshot, CryptoError> {
        let plaintext = self.decrypt(envelope)?;
        SyncSnapshot::from_json(&plaintext).map_err(|e| CryptoError::Decode(e.to_string()))
    }

    /// Parse the envelope text received from a data channel, then open it.
    pub fn open_text(&self, bytes: &[u8]) -> Result<SyncSnapshot, CryptoError> {
        let envelope = EncryptedEnvelope::from_text(bytes)
            .map_err(|e| CryptoError::Decode(format!("envelope: {}", e)))?;
        self.open(&envelope)
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncKey([REDACTED])")
    }
}

/// Derive the symmetric key for a sync code.
pub fn derive_key(code: &SyncCode) -> SyncKey {
    SyncKey::derive(code)
}

/// Derive on the blocking pool so the event loop keeps running.
pub async fn derive_key_async(code: &SyncCode) -> Result<SyncKey, CryptoError> {
    let code = code.clone();
    tokio::task::spawn_blocking(move || SyncKey::derive(&code))
        .await
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Encrypt a snapshot under the key derived from `code`.
pub fn encrypt(snapshot: &SyncSnapshot, code: &SyncCode) -> Result<EncryptedEnvelope, CryptoError> {
    derive_key(code).seal(snapshot)
}

/// Decrypt a snapshot with the key derived from `code`.
pub fn decrypt(envelope: &EncryptedEnvelope, code: &SyncCode) -> Result<SyncSnapshot, CryptoError> {
    derive_key(code).open(envelope)
}
