//! # sync-types
//!
//! Data model and wire formats for todo-sync device-to-device sync.
//!
//! This crate provides the foundational types used across all todo-sync crates:
//! - [`Task`], [`SyncSnapshot`] - The records being synchronized
//! - [`SyncCode`], [`PeerIdentity`] - The shared secret and broker identities
//! - [`EncryptedEnvelope`] - Encrypted snapshot wire format
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod task;

pub use envelope::{ConnectionMetadata, EncryptedEnvelope, NONCE_SIZE, PROTOCOL_TAG};
pub use error::TypesError;
pub use ids::{PeerIdentity, SyncCode};
pub use task::{now_millis, SyncSnapshot, Task};
