//! # sync-client
//!
//! Client library for todo-sync, end-to-end encrypted device-to-device task
//! sync.
//!
//! This is the library applications use to sync their task list.
//!
//! ## Features
//!
//! - **E2E Encryption**: AES-256-GCM with 96-bit random nonces
//! - **Shared-Code Key Derivation**: PBKDF2-HMAC-SHA256, 100k rounds
//! - **Broker Abstraction**: pluggable signaling broker (in-memory for tests)
//! - **Pure State Machine**: uses sync-core for side-effect-free bootstrap logic
//!
//! ## Example
//!
//! ```ignore
//! use todo_sync_client::{MemoryBroker, SyncConfig, SyncSession};
//!
//! let config = SyncConfig::from_file(Path::new("todo-sync.toml"))?;
//! let mut session = SyncSession::create(config, Arc::new(MemoryBroker::new())).await?;
//!
//! let mut inbound = session.open().await?;
//! session.send_snapshot(&remote, &snapshot).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod session;
pub mod store;

pub use bootstrap::{bootstrap, Bootstrapped};
pub use broker::{
    BrokerError, ConnectOptions, DataChannel, MemoryBroker, RegisterBehavior, Registration,
    RegistrationRecord, SignalingBroker,
};
pub use config::{BootstrapConfig, ConfigError, SyncConfig};
pub use crypto::{
    decrypt, derive_key, derive_key_async, encrypt, CryptoError, SyncKey, KEY_SIZE,
};
pub use error::SyncError;
pub use session::{parse_peer, InboundSync, InboundSyncs, SyncSession};
pub use store::{
    apply_snapshot, capture_snapshot, MemoryTaskStore, MergeReport, StoreError, TaskStore,
};

// Re-export the types applications handle directly.
pub use sync_core::{render_calendar, CalendarFeed, MergePolicy};
pub use sync_types::{PeerIdentity, SyncCode, SyncSnapshot, Task};
