//! SyncSession - the main interface for todo-sync.
//!
//! A session owns one broker registration and the derived key. Opening it
//! bootstraps an identity and starts a listener that decrypts every inbound
//! message, merges it into the attached [`TaskStore`] and publishes the
//! outcome on an [`InboundSyncs`] subscription.
//!
//! # Lifecycle
//!
//! ```text
//! Created --open()--> Open --close()--> Closed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use todo_sync_client::{MemoryBroker, MemoryTaskStore, SyncConfig, SyncSession};
//!
//! let store = Arc::new(MemoryTaskStore::new());
//! let mut session = SyncSession::create(config, Arc::new(broker))
//!     .await?
//!     .with_store(store.clone());
//!
//! let mut inbound = session.open().await?;
//! session.push_tasks(&other_device).await?;
//!
//! while let Some(sync) = inbound.next().await {
//!     // refresh the UI
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use sync_core::MergePolicy;
use sync_types::{PeerIdentity, SyncSnapshot};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bootstrap::bootstrap;
use crate::broker::{ConnectOptions, DataChannel, Registration, SignalingBroker};
use crate::config::SyncConfig;
use crate::crypto::{derive_key_async, CryptoError, SyncKey};
use crate::error::SyncError;
use crate::store::{apply_snapshot, capture_snapshot, MergeReport, TaskStore};

/// Outcome of one inbound message.
#[derive(Debug)]
pub enum InboundSync {
    /// A snapshot was decrypted (and merged, when a store is attached).
    Received {
        /// Sender identity.
        from: PeerIdentity,
        /// The decrypted snapshot.
        snapshot: SyncSnapshot,
        /// Merge outcome, `None` without a store.
        report: Option<MergeReport>,
    },
    /// The message was dropped. The connection stays open.
    Rejected {
        /// Sender identity.
        from: PeerIdentity,
        /// Why it was dropped.
        error: SyncError,
    },
}

/// Subscription to inbound sync outcomes, in arrival order.
#[derive(Debug)]
pub struct InboundSyncs {
    rx: mpsc::UnboundedReceiver<InboundSync>,
}

impl InboundSyncs {
    /// Wait for the next outcome. `None` once the session is closed.
    pub async fn next(&mut self) -> Option<InboundSync> {
        self.rx.recv().await
    }

    /// Take an outcome if one is already queued.
    pub fn try_next(&mut self) -> Option<InboundSync> {
        self.rx.try_recv().ok()
    }
}

/// Accept a remote identity entered by the user. Only blank input is
/// rejected; identities are otherwise opaque.
pub fn parse_peer(remote: &str) -> Result<PeerIdentity, SyncError> {
    PeerIdentity::new(remote.trim()).map_err(|e| SyncError::InvalidPeer(e.to_string()))
}

enum SessionState {
    Created,
    Open {
        identity: PeerIdentity,
        registration: Arc<dyn Registration>,
        listener: JoinHandle<()>,
    },
    Closed,
}

/// An encrypted sync endpoint for one device.
pub struct SyncSession {
    config: SyncConfig,
    key: Arc<SyncKey>,
    broker: Arc<dyn SignalingBroker>,
    store: Option<Arc<dyn TaskStore>>,
    state: SessionState,
}

impl SyncSession {
    /// Validate `config` and derive the session key.
    ///
    /// Key derivation runs on the blocking pool.
    pub async fn create(
        config: SyncConfig,
        broker: Arc<dyn SignalingBroker>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let key = derive_key_async(&config.sync_code).await?;

        Ok(Self {
            config,
            key: Arc::new(key),
            broker,
            store: None,
            state: SessionState::Created,
        })
    }

    /// Attach the store received snapshots are merged into and outbound
    /// snapshots are captured from.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The registered identity while open.
    pub fn identity(&self) -> Option<&PeerIdentity> {
        match &self.state {
            SessionState::Open { identity, .. } => Some(identity),
            SessionState::Created | SessionState::Closed => None,
        }
    }

    /// Check if the session is open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open { .. })
    }

    /// The merge policy applied to received snapshots.
    pub fn merge_policy(&self) -> MergePolicy {
        self.config.merge_policy
    }

    /// Register with the broker and start listening.
    ///
    /// # Errors
    ///
    /// Bootstrap errors, or [`SyncError::InvalidState`] if the session was
    /// already opened.
    pub async fn open(&mut self) -> Result<InboundSyncs, SyncError> {
        match self.state {
            SessionState::Created => {}
            SessionState::Open { .. } => {
                return Err(SyncError::InvalidState("session already open"));
            }
            SessionState::Closed => return Err(SyncError::InvalidState("session closed")),
        }

        let done = bootstrap(self.broker.as_ref(), &self.config.bootstrap_policy()).await?;

        let (events, rx) = mpsc::unbounded_channel();
        let listener = Listener {
            registration: Arc::clone(&done.registration),
            key: Arc::clone(&self.key),
            store: self.store.clone(),
            policy: self.config.merge_policy,
            events,
        };
        let listener = tokio::spawn(listener.run());

        info!(identity = %done.identity, attempts = done.attempts, "Sync session open");
        self.state = SessionState::Open {
            identity: done.identity,
            registration: done.registration,
            listener,
        };

        Ok(InboundSyncs { rx })
    }

    /// Encrypt `snapshot` and send it to `remote` over a fresh connection.
    ///
    /// # Errors
    ///
    /// [`SyncError::ConnectionTimeout`] if connecting and opening together take
    /// longer than the configured timeout; broker errors otherwise. Nothing is
    /// retried.
    pub async fn send_snapshot(
        &self,
        remote: &PeerIdentity,
        snapshot: &SyncSnapshot,
    ) -> Result<(), SyncError> {
        let (identity, registration) = match &self.state {
            SessionState::Open {
                identity,
                registration,
                ..
            } => (identity, registration),
            SessionState::Created => return Err(SyncError::InvalidState("session not open")),
            SessionState::Closed => return Err(SyncError::InvalidState("session closed")),
        };

        debug!(%remote, "Connecting for sync");
        let timeout = self.config.connect_timeout();
        let deadline = Instant::now() + timeout;

        let connecting = registration.connect(remote, ConnectOptions::sync(identity));
        let channel = match tokio::time::timeout_at(deadline, connecting).await {
            Ok(result) => result?,
            Err(_) => return Err(connection_timeout(remote, timeout)),
        };

        match tokio::time::timeout_at(deadline, channel.opened()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                channel.close().await;
                return Err(e.into());
            }
            Err(_) => {
                channel.close().await;
                return Err(connection_timeout(remote, timeout));
            }
        }

        let sent = self.transmit(channel.as_ref(), snapshot).await;
        channel.close().await;
        sent?;

        info!(%remote, tasks = snapshot.tasks.len(), "Sent snapshot");
        Ok(())
    }

    async fn transmit(
        &self,
        channel: &dyn DataChannel,
        snapshot: &SyncSnapshot,
    ) -> Result<(), SyncError> {
        let text = self
            .key
            .seal(snapshot)?
            .to_text()
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        channel.send(text.into_bytes()).await?;
        Ok(())
    }

    /// Send every task in the attached store to `remote`.
    ///
    /// Returns the number of tasks sent.
    pub async fn push_tasks(&self, remote: &PeerIdentity) -> Result<usize, SyncError> {
        let store = self
            .store
            .as_ref()
            .ok_or(SyncError::InvalidState("no task store attached"))?;
        let snapshot = capture_snapshot(store.as_ref()).await?;
        self.send_snapshot(remote, &snapshot).await?;
        Ok(snapshot.tasks.len())
    }

    /// Stop listening and release the identity. Idempotent.
    pub async fn close(&mut self) {
        if let SessionState::Open {
            identity,
            registration,
            listener,
        } = std::mem::replace(&mut self.state, SessionState::Closed)
        {
            listener.abort();
            registration.destroy().await;
            info!(%identity, "Sync session closed");
        }
    }
}

// The listener holds a registration handle; aborting it drops that handle,
// and dropping the last one releases the identity.
impl Drop for SyncSession {
    fn drop(&mut self) {
        if let SessionState::Open { listener, .. } = &self.state {
            listener.abort();
        }
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            SessionState::Created => "created",
            SessionState::Open { .. } => "open",
            SessionState::Closed => "closed",
        };
        f.debug_struct("SyncSession")
            .field("state", &state)
            .field("identity", &self.identity())
            .field("merge_policy", &self.config.merge_policy)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Accepts inbound connections and funnels their messages through one merge
/// loop so merges happen one at a time in arrival order.
struct Listener {
    registration: Arc<dyn Registration>,
    key: Arc<SyncKey>,
    store: Option<Arc<dyn TaskStore>>,
    policy: MergePolicy,
    events: mpsc::UnboundedSender<InboundSync>,
}

impl Listener {
    async fn run(self) {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(PeerIdentity, Vec<u8>)>();
        // Dropping the set aborts every reader.
        let mut readers = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.registration.accept() => match accepted {
                    Some(channel) => {
                        let tagged = channel.metadata().is_some_and(|m| m.is_sync());
                        info!(remote = %channel.remote(), tagged, "Accepted sync connection");
                        readers.spawn(read_channel(channel, raw_tx.clone()));
                    }
                    None => {
                        debug!("Registration closed, listener stopping");
                        break;
                    }
                },
                Some((from, bytes)) = raw_rx.recv() => self.handle(from, bytes).await,
                Some(_) = readers.join_next(), if !readers.is_empty() => {}
            }
        }
    }

    async fn handle(&self, from: PeerIdentity, bytes: Vec<u8>) {
        let outcome = match self.key.open_text(&bytes) {
            Ok(snapshot) => self.merge(from, snapshot).await,
            Err(CryptoError::Authentication) => {
                warn!(
                    %from,
                    "Rejected sync payload: authentication failed (sync code mismatch or tampering)"
                );
                InboundSync::Rejected {
                    from,
                    error: SyncError::Authentication,
                }
            }
            Err(e) => {
                warn!(%from, error = %e, "Rejected malformed sync payload");
                InboundSync::Rejected {
                    from,
                    error: e.into(),
                }
            }
        };

        if self.events.send(outcome).is_err() {
            debug!("No subscriber for inbound syncs");
        }
    }

    async fn merge(&self, from: PeerIdentity, snapshot: SyncSnapshot) -> InboundSync {
        let Some(store) = &self.store else {
            debug!(%from, tasks = snapshot.tasks.len(), "Received snapshot");
            return InboundSync::Received {
                from,
                snapshot,
                report: None,
            };
        };

        match apply_snapshot(store.as_ref(), &snapshot, self.policy).await {
            Ok(report) => {
                info!(
                    %from,
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    "Merged snapshot"
                );
                InboundSync::Received {
                    from,
                    snapshot,
                    report: Some(report),
                }
            }
            Err(e) => {
                error!(%from, error = %e, "Failed to merge snapshot");
                InboundSync::Rejected {
                    from,
                    error: e.into(),
                }
            }
        }
    }
}

fn connection_timeout(remote: &PeerIdentity, timeout: std::time::Duration) -> SyncError {
    warn!(%remote, ?timeout, "Connection did not open in time");
    SyncError::ConnectionTimeout {
        remote: remote.clone(),
        timeout,
    }
}

async fn read_channel(
    channel: Box<dyn DataChannel>,
    sink: mpsc::UnboundedSender<(PeerIdentity, Vec<u8>)>,
) {
    let remote = channel.remote().clone();
    while let Some(bytes) = channel.recv().await {
        if sink.send((remote.clone(), bytes)).is_err() {
            break;
        }
    }
    debug!(%remote, "Sync connection closed");
    channel.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, RegisterBehavior};
    use std::time::Duration;
    use sync_types::SyncCode;

    fn config() -> SyncConfig {
        SyncConfig::new(SyncCode::new("abc123").unwrap())
    }

    async fn session(broker: &MemoryBroker) -> SyncSession {
        SyncSession::create(config(), Arc::new(broker.clone()))
            .await
            .unwrap()
    }

    // ===========================================
    // Lifecycle Tests
    // ===========================================

    #[tokio::test]
    async fn created_session_is_not_open() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;

        assert!(!session.is_open());
        assert!(session.identity().is_none());
        assert!(broker.registrations().is_empty());
    }

    #[tokio::test]
    async fn open_registers_identity() {
        let broker = MemoryBroker::new();
        let mut session = session(&broker).await;

        session.open().await.unwrap();

        assert!(session.is_open());
        let identity = session.identity().unwrap().clone();
        assert!(broker.is_registered(&identity));
    }

    #[tokio::test]
    async fn open_twice_is_invalid() {
        let broker = MemoryBroker::new();
        let mut session = session(&broker).await;
        session.open().await.unwrap();

        assert!(matches!(
            session.open().await,
            Err(SyncError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_identity() {
        let broker = MemoryBroker::new();
        let mut session = session(&broker).await;
        let mut inbound = session.open().await.unwrap();
        let identity = session.identity().unwrap().clone();

        session.close().await;
        session.close().await;

        assert!(!session.is_open());
        assert!(!broker.is_registered(&identity));
        assert_eq!(broker.destroyed(), vec![identity]);
        assert!(inbound.next().await.is_none());
        assert!(matches!(
            session.open().await,
            Err(SyncError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn send_before_open_is_invalid() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let remote = PeerIdentity::new("todo-remote").unwrap();
        let snapshot = SyncSnapshot::capture(vec![]);

        assert!(matches!(
            session.send_snapshot(&remote, &snapshot).await,
            Err(SyncError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn push_without_store_is_invalid() {
        let broker = MemoryBroker::new();
        let mut session = session(&broker).await;
        session.open().await.unwrap();
        let remote = PeerIdentity::new("todo-remote").unwrap();

        assert!(matches!(
            session.push_tasks(&remote).await,
            Err(SyncError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_transport_error() {
        let broker = MemoryBroker::new();
        let mut session = session(&broker).await;
        session.open().await.unwrap();
        let remote = PeerIdentity::new("todo-nobody").unwrap();

        let result = session
            .send_snapshot(&remote, &SyncSnapshot::capture(vec![]))
            .await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn dropping_open_session_releases_identity() {
        let broker = MemoryBroker::new();
        let mut session = session(&broker).await;
        let mut inbound = session.open().await.unwrap();
        let identity = session.identity().unwrap().clone();

        drop(session);
        // The stream ends once the aborted listener has dropped its handle.
        assert!(inbound.next().await.is_none());

        assert!(!broker.is_registered(&identity));
        assert_eq!(broker.destroyed(), vec![identity]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_open_releases_pending_registration() {
        let broker = MemoryBroker::new();
        broker.script_registrations(std::iter::repeat(RegisterBehavior::Silent).take(4));
        let mut session = session(&broker).await;

        let result = tokio::time::timeout(Duration::from_secs(7), session.open()).await;

        assert!(result.is_err());
        assert!(!session.is_open());
        assert_eq!(broker.registrations().len(), 2);
        assert_eq!(broker.destroyed().len(), broker.registrations().len());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_counts_against_connection_timeout() {
        let broker = MemoryBroker::new();
        let mut alice = session(&broker).await;
        let mut bob = session(&broker).await;
        alice.open().await.unwrap();
        bob.open().await.unwrap();
        let remote = bob.identity().unwrap().clone();
        broker.hang_connects(true);

        let started = Instant::now();
        let result = alice
            .send_snapshot(&remote, &SyncSnapshot::capture(vec![]))
            .await;

        assert!(matches!(
            result,
            Err(SyncError::ConnectionTimeout { timeout, .. }) if timeout == Duration::from_secs(10)
        ));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(broker.closed_channels(), 0);
    }

    #[test]
    fn parse_peer_rejects_blank_input() {
        assert!(matches!(parse_peer("   "), Err(SyncError::InvalidPeer(_))));
        assert_eq!(parse_peer(" todo-abc ").unwrap().as_str(), "todo-abc");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let broker = MemoryBroker::new();
        let config = config().with_connect_timeout(std::time::Duration::ZERO);

        let result = SyncSession::create(config, Arc::new(broker)).await;
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn debug_does_not_leak_key() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        let debug = format!("{:?}", session);

        assert!(debug.contains("created"));
        assert!(!debug.contains("abc123"));
    }
}
