//! Sync code and peer identity generation.
//!
//! Sync codes are long-lived secrets; peer identities are throwaway broker
//! names that change on every bootstrap attempt.

use sync_types::{PeerIdentity, SyncCode};
use thiserror::Error;

/// Number of random bytes in a generated sync code.
pub const SYNC_CODE_BYTES: usize = 12;

/// Number of random bytes in a generated peer identity.
pub const IDENTITY_RANDOM_BYTES: usize = 8;

/// Prefix shared by every identity this crate generates.
pub const IDENTITY_PREFIX: &str = "todo";

/// Error type for identity generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The OS random source could not be read.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// The generated value was rejected by its type.
    #[error("malformed identifier: {0}")]
    Malformed(String),
}

fn random_bytes<const N: usize>() -> Result<[u8; N], IdentityError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| IdentityError::EntropyUnavailable(e.to_string()))?;
    Ok(bytes)
}

/// Generate a fresh sync code: 12 CSPRNG bytes, lowercase hex.
///
/// Regenerating invalidates any code handed out before; there is no rotation.
pub fn generate_sync_code() -> Result<SyncCode, IdentityError> {
    let bytes = random_bytes::<SYNC_CODE_BYTES>()?;
    SyncCode::new(hex::encode(bytes)).map_err(|e| IdentityError::Malformed(e.to_string()))
}

/// Generate a peer identity for bootstrap attempt `attempt`.
///
/// The sync code is not an input: identities are visible to the broker and
/// the code is the encryption secret.
pub fn generate_peer_identity(attempt: u32) -> Result<PeerIdentity, IdentityError> {
    let random = random_bytes::<IDENTITY_RANDOM_BYTES>()?;
    peer_identity_from_parts(sync_types::now_millis(), &random, attempt)
}

/// Format `todo-{base36 timestamp}-{hex random}[-{attempt}]`.
pub fn peer_identity_from_parts(
    timestamp_ms: u64,
    random: &[u8],
    attempt: u32,
) -> Result<PeerIdentity, IdentityError> {
    let mut id = format!(
        "{}-{}-{}",
        IDENTITY_PREFIX,
        to_base36(timestamp_ms),
        hex::encode(random)
    );
    if attempt > 0 {
        id.push_str(&format!("-{}", attempt));
    }
    PeerIdentity::new(id).map_err(|e| IdentityError::Malformed(e.to_string()))
}

/// Lowercase base-36 rendering of `value`.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
