//! Identity types for todo-sync.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::TypesError;

/// The secret shared out-of-band between two devices.
///
/// Doubles as the human-shareable pairing token and as the input to key
/// derivation, so it is zeroized on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(try_from = "String", into = "String")]
pub struct SyncCode(String);

impl SyncCode {
    /// Wrap a sync code. The only validation is non-emptiness.
    pub fn new(code: impl Into<String>) -> Result<Self, TypesError> {
        let code = code.into();
        if code.is_empty() {
            return Err(TypesError::Empty("sync code"));
        }
        Ok(Self(code))
    }

    /// The code as entered or generated.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTF-8 bytes fed into key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for SyncCode {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SyncCode> for String {
    fn from(code: SyncCode) -> Self {
        code.0.clone()
    }
}

// Intentionally opaque debug to avoid logging secrets
impl fmt::Debug for SyncCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncCode([REDACTED])")
    }
}

/// An ephemeral identifier registered with the signaling broker.
///
/// Valid for one bootstrap attempt only; every retry registers a new one.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Wrap an identity received from elsewhere (e.g. typed in by a user).
    pub fn new(identity: impl Into<String>) -> Result<Self, TypesError> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(TypesError::Empty("peer identity"));
        }
        Ok(Self(identity))
    }

    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerIdentity {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeerIdentity> for String {
    fn from(identity: PeerIdentity) -> Self {
        identity.0
    }
}

impl std::str::FromStr for PeerIdentity {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({})", self.0)
    }
}
