//! In-process broker for testing.
//!
//! Every [`MemoryBroker`] clone shares one namespace, so two sessions built
//! from clones of the same broker can reach each other. Registration outcomes
//! can be scripted, connection opens stalled and sends failed, and everything
//! the broker saw is kept for inspection.

use super::{BrokerError, ConnectOptions, DataChannel, Registration, SignalingBroker};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{ConnectionMetadata, PeerIdentity};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;

/// How the broker answers the next registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegisterBehavior {
    /// Acknowledge, unless the identity is already held.
    #[default]
    Acknowledge,
    /// Report the identity as taken.
    Collide,
    /// Never answer.
    Silent,
    /// Fail with [`BrokerError::Unavailable`].
    Fail(String),
}

/// A registration the broker received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// Identity that was requested.
    pub identity: PeerIdentity,
    /// When it was requested (tokio clock, so paused tests see virtual time).
    pub at: Instant,
}

/// In-process signaling broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Default)]
struct BrokerInner {
    next_serial: u64,
    peers: HashMap<PeerIdentity, Peer>,
    script: VecDeque<RegisterBehavior>,
    history: Vec<RegistrationRecord>,
    destroyed: Vec<PeerIdentity>,
    observed_metadata: Vec<ConnectionMetadata>,
    closed_channels: usize,
    stall_connections: bool,
    hang_connects: bool,
    fail_next_send: Option<String>,
}

struct Peer {
    serial: u64,
    inbound: mpsc::UnboundedSender<Box<dyn DataChannel>>,
}

// A panicking test thread must not wedge the other device.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    /// Create an empty broker that acknowledges every registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next registration. Unscripted registrations
    /// are acknowledged.
    pub fn script_registration(&self, behavior: RegisterBehavior) {
        lock(&self.inner).script.push_back(behavior);
    }

    /// Queue several registration outcomes in order.
    pub fn script_registrations(&self, behaviors: impl IntoIterator<Item = RegisterBehavior>) {
        lock(&self.inner).script.extend(behaviors);
    }

    /// When set, new outbound channels never open.
    pub fn stall_connections(&self, stall: bool) {
        lock(&self.inner).stall_connections = stall;
    }

    /// When set, `connect()` itself never returns.
    pub fn hang_connects(&self, hang: bool) {
        lock(&self.inner).hang_connects = hang;
    }

    /// Cause the next `send()` on any channel to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        lock(&self.inner).fail_next_send = Some(error.to_string());
    }

    /// Every registration received, in order.
    pub fn registrations(&self) -> Vec<RegistrationRecord> {
        lock(&self.inner).history.clone()
    }

    /// Identities released through [`Registration::destroy`] or by dropping
    /// the handle, in order.
    pub fn destroyed(&self) -> Vec<PeerIdentity> {
        lock(&self.inner).destroyed.clone()
    }

    /// Metadata attached to every outbound connection attempt.
    pub fn observed_metadata(&self) -> Vec<ConnectionMetadata> {
        lock(&self.inner).observed_metadata.clone()
    }

    /// Channel ends closed through [`DataChannel::close`].
    pub fn closed_channels(&self) -> usize {
        lock(&self.inner).closed_channels
    }

    /// Whether `identity` is currently held.
    pub fn is_registered(&self, identity: &PeerIdentity) -> bool {
        lock(&self.inner).peers.contains_key(identity)
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("MemoryBroker")
            .field("peers", &inner.peers.keys().collect::<Vec<_>>())
            .field("registrations", &inner.history.len())
            .finish()
    }
}

impl SignalingBroker for MemoryBroker {
    fn register(&self, identity: PeerIdentity) -> Box<dyn Registration> {
        let mut inner = lock(&self.inner);
        inner.next_serial += 1;
        let serial = inner.next_serial;
        inner.history.push(RegistrationRecord {
            identity: identity.clone(),
            at: Instant::now(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let behavior = inner.script.pop_front().unwrap_or_default();
        let outcome = match behavior {
            RegisterBehavior::Acknowledge if inner.peers.contains_key(&identity) => {
                Outcome::Answered(Err(BrokerError::IdentityTaken))
            }
            RegisterBehavior::Acknowledge => {
                inner.peers.insert(identity.clone(), Peer { serial, inbound: tx });
                Outcome::Answered(Ok(()))
            }
            RegisterBehavior::Collide => Outcome::Answered(Err(BrokerError::IdentityTaken)),
            RegisterBehavior::Silent => Outcome::Silent,
            RegisterBehavior::Fail(error) => {
                Outcome::Answered(Err(BrokerError::Unavailable(error)))
            }
        };

        Box::new(MemoryRegistration {
            identity,
            serial,
            outcome,
            inbound: AsyncMutex::new(rx),
            destroyed: AtomicBool::new(false),
            broker: Arc::clone(&self.inner),
        })
    }
}

enum Outcome {
    Answered(Result<(), BrokerError>),
    Silent,
}

struct MemoryRegistration {
    identity: PeerIdentity,
    serial: u64,
    outcome: Outcome,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Box<dyn DataChannel>>>,
    destroyed: AtomicBool,
    broker: Arc<Mutex<BrokerInner>>,
}

impl MemoryRegistration {
    fn holds_identity(&self, inner: &BrokerInner) -> bool {
        inner
            .peers
            .get(&self.identity)
            .is_some_and(|peer| peer.serial == self.serial)
    }

    fn open_channel(
        &self,
        remote: &PeerIdentity,
        options: ConnectOptions,
    ) -> Result<Box<dyn DataChannel>, BrokerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BrokerError::Destroyed);
        }

        let mut inner = lock(&self.broker);
        if !self.holds_identity(&inner) {
            return Err(BrokerError::Unavailable(format!(
                "{} is not registered",
                self.identity
            )));
        }
        if let Some(metadata) = &options.metadata {
            inner.observed_metadata.push(metadata.clone());
        }

        let stalled = inner.stall_connections;
        let peer = inner
            .peers
            .get(remote)
            .ok_or_else(|| BrokerError::PeerUnavailable(remote.to_string()))?;

        let (to_remote, from_local) = mpsc::unbounded_channel();
        let (to_local, from_remote) = mpsc::unbounded_channel();

        if !stalled {
            let far_end = MemoryChannel::new(
                self.identity.clone(),
                options.metadata.clone(),
                false,
                to_local,
                from_local,
                Arc::clone(&self.broker),
            );
            peer.inbound
                .send(Box::new(far_end))
                .map_err(|_| BrokerError::PeerUnavailable(remote.to_string()))?;
        }

        Ok(Box::new(MemoryChannel::new(
            remote.clone(),
            options.metadata,
            stalled,
            to_remote,
            from_remote,
            Arc::clone(&self.broker),
        )))
    }

    fn release(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = lock(&self.broker);
        if self.holds_identity(&inner) {
            inner.peers.remove(&self.identity);
        }
        inner.destroyed.push(self.identity.clone());
    }
}

impl Drop for MemoryRegistration {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Registration for MemoryRegistration {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn acknowledged(&self) -> Result<(), BrokerError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BrokerError::Destroyed);
        }
        match &self.outcome {
            Outcome::Answered(result) => result.clone(),
            Outcome::Silent => std::future::pending().await,
        }
    }

    async fn accept(&self) -> Option<Box<dyn DataChannel>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return None;
        }
        self.inbound.lock().await.recv().await
    }

    async fn connect(
        &self,
        remote: &PeerIdentity,
        options: ConnectOptions,
    ) -> Result<Box<dyn DataChannel>, BrokerError> {
        let hang = lock(&self.broker).hang_connects;
        if hang {
            return std::future::pending().await;
        }
        self.open_channel(remote, options)
    }

    async fn destroy(&self) {
        self.release();
    }
}

struct MemoryChannel {
    remote: PeerIdentity,
    metadata: Option<ConnectionMetadata>,
    stalled: bool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    broker: Arc<Mutex<BrokerInner>>,
}

impl MemoryChannel {
    fn new(
        remote: PeerIdentity,
        metadata: Option<ConnectionMetadata>,
        stalled: bool,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        broker: Arc<Mutex<BrokerInner>>,
    ) -> Self {
        Self {
            remote,
            metadata,
            stalled,
            outbound: Mutex::new(Some(outbound)),
            inbound: AsyncMutex::new(inbound),
            broker,
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.outbound).is_none()
    }

    fn write(&self, data: Vec<u8>) -> Result<(), BrokerError> {
        if let Some(error) = lock(&self.broker).fail_next_send.take() {
            return Err(BrokerError::SendFailed(error));
        }
        if self.stalled {
            return Err(BrokerError::ConnectionFailed("channel never opened".into()));
        }
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(data).map_err(|_| BrokerError::ChannelClosed),
            None => Err(BrokerError::ChannelClosed),
        }
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    fn remote(&self) -> &PeerIdentity {
        &self.remote
    }

    fn metadata(&self) -> Option<&ConnectionMetadata> {
        self.metadata.as_ref()
    }

    async fn opened(&self) -> Result<(), BrokerError> {
        if self.stalled {
            return std::future::pending().await;
        }
        if self.is_closed() {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }

    async fn send(&self, data: Vec<u8>) -> Result<(), BrokerError> {
        self.write(data)
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().await.recv().await
    }

    async fn close(&self) {
        if lock(&self.outbound).take().is_some() {
            lock(&self.broker).closed_channels += 1;
        }
    }
}
