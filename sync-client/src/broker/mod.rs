//! Signaling broker abstraction for todo-sync.
//!
//! The broker maps short-lived peer identities to reachable endpoints and
//! brokers direct data channels between them. Every concrete broker (a
//! PeerJS-style server, the in-process [`MemoryBroker`]) implements the same
//! three traits:
//!
//! - [`SignalingBroker::register`] claims an identity
//! - [`Registration`] waits for the acknowledgement, then accepts inbound
//!   channels and opens outbound ones
//! - [`DataChannel`] carries whole text messages between two peers
//!
//! # Example
//!
//! ```ignore
//! let broker = MemoryBroker::new();
//! let registration = broker.register(identity);
//! registration.acknowledged().await?;
//! let channel = registration.connect(&remote, ConnectOptions::sync(&identity)).await?;
//! channel.opened().await?;
//! channel.send(envelope_text.into_bytes()).await?;
//! ```

mod memory;

pub use memory::{MemoryBroker, RegisterBehavior, RegistrationRecord};

use async_trait::async_trait;
use sync_types::{ConnectionMetadata, PeerIdentity};
use thiserror::Error;

/// Broker errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Another peer already holds the identity.
    #[error("identity already taken")]
    IdentityTaken,

    /// The broker itself could not be reached or refused the request.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The remote identity is not registered.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    /// The data channel could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The data channel was closed by either side.
    #[error("channel closed")]
    ChannelClosed,

    /// A message could not be written to the channel.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The registration was destroyed.
    #[error("registration destroyed")]
    Destroyed,
}

/// Options for an outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Ordered, retransmitted delivery.
    pub reliable: bool,
    /// Tag presented to the remote when the channel opens.
    pub metadata: Option<ConnectionMetadata>,
}

impl ConnectOptions {
    /// Reliable channel tagged as a todo-sync connection from `source`.
    pub fn sync(source: &PeerIdentity) -> Self {
        Self {
            reliable: true,
            metadata: Some(ConnectionMetadata::for_sync(source.clone())),
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reliable: true,
            metadata: None,
        }
    }
}

/// Entry point of a signaling broker.
pub trait SignalingBroker: Send + Sync {
    /// Start registering `identity`. The outcome is reported by
    /// [`Registration::acknowledged`].
    fn register(&self, identity: PeerIdentity) -> Box<dyn Registration>;
}

/// A (possibly pending) claim on an identity.
///
/// Dropping the handle must release the identity exactly as
/// [`Registration::destroy`] does, so a cancelled bootstrap or a session
/// dropped without `close()` leaves nothing held at the broker.
#[async_trait]
pub trait Registration: Send + Sync {
    /// The identity being registered.
    fn identity(&self) -> &PeerIdentity;

    /// Resolve once the broker accepts or rejects the identity.
    ///
    /// `Err(BrokerError::IdentityTaken)` is the collision signal. A broker
    /// that never answers leaves this pending; callers apply their own
    /// timeout.
    async fn acknowledged(&self) -> Result<(), BrokerError>;

    /// Wait for the next inbound channel. `None` once the registration is
    /// destroyed.
    async fn accept(&self) -> Option<Box<dyn DataChannel>>;

    /// Open a channel to `remote`. The channel may still be opening when
    /// this returns; see [`DataChannel::opened`].
    async fn connect(
        &self,
        remote: &PeerIdentity,
        options: ConnectOptions,
    ) -> Result<Box<dyn DataChannel>, BrokerError>;

    /// Release the identity and stop accepting channels. Idempotent.
    async fn destroy(&self);
}

/// A bidirectional message channel between two peers.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// The peer on the other end.
    fn remote(&self) -> &PeerIdentity;

    /// Metadata the connecting side attached, if any.
    fn metadata(&self) -> Option<&ConnectionMetadata>;

    /// Resolve once the channel is usable. May never resolve.
    async fn opened(&self) -> Result<(), BrokerError>;

    /// Send one whole message.
    async fn send(&self, data: Vec<u8>) -> Result<(), BrokerError>;

    /// Receive the next message, or `None` when the channel has closed.
    async fn recv(&self) -> Option<Vec<u8>>;

    /// Close the channel. Idempotent.
    async fn close(&self);
}
