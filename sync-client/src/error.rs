//! Error taxonomy surfaced to applications.

use std::time::Duration;
use sync_types::PeerIdentity;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::store::StoreError;

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The broker already held the identity of one bootstrap attempt.
    #[error("identity {identity} already taken")]
    IdentityCollision {
        /// The identity that collided.
        identity: PeerIdentity,
    },

    /// One registration attempt was not acknowledged in time.
    #[error("registration of {identity} not acknowledged within {timeout:?}")]
    BootstrapTimeout {
        /// The identity that timed out.
        identity: PeerIdentity,
        /// The per-attempt timeout.
        timeout: Duration,
    },

    /// Every allowed registration attempt failed.
    #[error("bootstrap gave up after {attempts} attempts")]
    BootstrapExhausted {
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// Bootstrap hit an unrecoverable error.
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// An outbound connection did not open in time.
    #[error("connection to {remote} not open within {timeout:?}")]
    ConnectionTimeout {
        /// The peer being contacted.
        remote: PeerIdentity,
        /// The open timeout that elapsed.
        timeout: Duration,
    },

    /// A received payload failed its tag check.
    #[error("authentication failed: wrong sync code or tampered payload")]
    Authentication,

    /// A received payload was not a well-formed envelope or snapshot.
    #[error("decode error: {0}")]
    Decode(String),

    /// Broker or data channel failure.
    #[error("transport error: {0}")]
    Transport(#[from] BrokerError),

    /// Key derivation or encryption failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The task store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A remote identity was rejected.
    #[error("invalid peer identity: {0}")]
    InvalidPeer(String),

    /// The operation is not allowed in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => SyncError::Authentication,
            CryptoError::Decode(msg) => SyncError::Decode(msg),
            other => SyncError::Crypto(other.to_string()),
        }
    }
}

impl SyncError {
    /// Whether the error means the peer used a different sync code (or the
    /// payload was tampered with).
    pub fn is_authentication(&self) -> bool {
        matches!(self, SyncError::Authentication)
    }
}
