//! Envelope - the wire format of an encrypted snapshot.

use serde::{Deserialize, Serialize};

use crate::{PeerIdentity, TypesError};

/// AES-GCM nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Protocol tag carried in connection metadata.
pub const PROTOCOL_TAG: &str = "todo-sync";

/// An encrypted [`SyncSnapshot`](crate::SyncSnapshot).
///
/// The ciphertext includes the AEAD tag. On the wire this is a self-contained
/// JSON text blob: `{"iv": [12 numbers], "data": [bytes...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Fresh random nonce, never reused under one key.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeWire {
    iv: Vec<u8>,
    data: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Serialize to the text blob sent over a data channel.
    pub fn to_text(&self) -> Result<String, TypesError> {
        let wire = EnvelopeWire {
            iv: self.nonce.to_vec(),
            data: self.ciphertext.clone(),
        };
        serde_json::to_string(&wire).map_err(TypesError::Serialization)
    }

    /// Parse the text blob received from a data channel.
    pub fn from_text(bytes: &[u8]) -> Result<Self, TypesError> {
        let wire: EnvelopeWire =
            serde_json::from_slice(bytes).map_err(TypesError::Deserialization)?;

        let nonce: [u8; NONCE_SIZE] = wire.iv.as_slice().try_into().map_err(|_| {
            TypesError::InvalidData(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                wire.iv.len()
            ))
        })?;

        Ok(Self {
            nonce,
            ciphertext: wire.data,
        })
    }
}

/// Metadata attached to every outbound sync connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    /// Protocol tag, always [`PROTOCOL_TAG`] for connections we open.
    #[serde(rename = "type")]
    pub kind: String,
    /// The sender's own registered identity.
    pub source_id: PeerIdentity,
}

impl ConnectionMetadata {
    /// Metadata for a sync connection originating from `source_id`.
    pub fn for_sync(source_id: PeerIdentity) -> Self {
        Self {
            kind: PROTOCOL_TAG.to_string(),
            source_id,
        }
    }

    /// Whether the connection claims to speak the sync protocol.
    pub fn is_sync(&self) -> bool {
        self.kind == PROTOCOL_TAG
    }
}
