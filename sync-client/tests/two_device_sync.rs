//! Two devices syncing over one in-process broker.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use todo_sync_client::{
    derive_key, ConnectOptions, DataChannel, InboundSync, InboundSyncs, MemoryBroker,
    MemoryTaskStore, MergePolicy, PeerIdentity, RegisterBehavior, SignalingBroker, SyncCode,
    SyncConfig, SyncError, SyncSession, SyncSnapshot, Task, TaskStore,
};

struct Device {
    session: SyncSession,
    store: Arc<MemoryTaskStore>,
    inbound: InboundSyncs,
}

impl Device {
    fn identity(&self) -> PeerIdentity {
        self.session.identity().unwrap().clone()
    }
}

async fn device(broker: &MemoryBroker, code: &str) -> Device {
    device_with(broker, SyncConfig::new(SyncCode::new(code).unwrap())).await
}

async fn device_with(broker: &MemoryBroker, config: SyncConfig) -> Device {
    let store = Arc::new(MemoryTaskStore::new());
    let mut session = SyncSession::create(config, Arc::new(broker.clone()))
        .await
        .unwrap()
        .with_store(store.clone());
    let inbound = session.open().await.unwrap();
    Device {
        session,
        store,
        inbound,
    }
}

/// A registered peer that writes straight to a channel, bypassing a session.
async fn raw_peer(broker: &MemoryBroker, target: &PeerIdentity) -> Box<dyn DataChannel> {
    let identity = PeerIdentity::new("todo-raw-peer").unwrap();
    let registration = broker.register(identity.clone());
    registration.acknowledged().await.unwrap();
    registration
        .connect(target, ConnectOptions::sync(&identity))
        .await
        .unwrap()
}

fn sealed(code: &str, tasks: Vec<Task>) -> Vec<u8> {
    derive_key(&SyncCode::new(code).unwrap())
        .seal(&SyncSnapshot::capture(tasks))
        .unwrap()
        .to_text()
        .unwrap()
        .into_bytes()
}

fn milk() -> Task {
    Task {
        id: "1".into(),
        text: "Buy milk".into(),
        completed: false,
        due_date: NaiveDate::from_ymd_opt(2024, 6, 1),
        created_at: 1_717_200_000_000,
        updated_at: 1_717_200_000_000,
    }
}

// ===========================================
// Happy Path
// ===========================================

#[tokio::test]
async fn task_round_trips_between_devices() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let mut bob = device(&broker, "abc123").await;

    alice.store.put(milk()).await.unwrap();
    let sent = alice.session.push_tasks(&bob.identity()).await.unwrap();
    assert_eq!(sent, 1);

    match bob.inbound.next().await.unwrap() {
        InboundSync::Received {
            from,
            snapshot,
            report,
        } => {
            assert_eq!(from, alice.identity());
            assert_eq!(snapshot.tasks, vec![milk()]);
            assert_eq!(report.unwrap().applied, vec!["1".to_string()]);
        }
        other => panic!("expected Received, got {:?}", other),
    }

    assert_eq!(bob.store.get_all().await.unwrap(), vec![milk()]);
}

#[tokio::test]
async fn outbound_connection_is_tagged_with_sender() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let bob = device(&broker, "abc123").await;

    alice
        .session
        .send_snapshot(&bob.identity(), &SyncSnapshot::capture(vec![milk()]))
        .await
        .unwrap();

    let metadata = broker.observed_metadata();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].kind, "todo-sync");
    assert_eq!(metadata[0].source_id, alice.identity());
}

#[tokio::test]
async fn merges_happen_in_arrival_order() {
    let broker = MemoryBroker::new();
    let mut bob = device(&broker, "abc123").await;

    let mut edited = milk();
    edited.text = "Buy oat milk".into();
    edited.updated_at += 1;

    let channel = raw_peer(&broker, &bob.identity()).await;
    channel.send(sealed("abc123", vec![milk()])).await.unwrap();
    channel.send(sealed("abc123", vec![edited.clone()])).await.unwrap();

    for _ in 0..2 {
        assert!(matches!(
            bob.inbound.next().await,
            Some(InboundSync::Received { .. })
        ));
    }
    assert_eq!(bob.store.get_all().await.unwrap(), vec![edited]);
}

#[tokio::test]
async fn last_writer_wins_keeps_newer_local_record() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let config = SyncConfig::new(SyncCode::new("abc123").unwrap())
        .with_merge_policy(MergePolicy::LastWriterWins);
    let mut bob = device_with(&broker, config).await;

    let mut local = milk();
    local.text = "Buy milk (edited on bob)".into();
    local.updated_at += 10;
    bob.store.put(local.clone()).await.unwrap();

    alice.store.put(milk()).await.unwrap();
    alice.session.push_tasks(&bob.identity()).await.unwrap();

    match bob.inbound.next().await.unwrap() {
        InboundSync::Received { report, .. } => {
            assert_eq!(report.unwrap().skipped, vec!["1".to_string()]);
        }
        other => panic!("expected Received, got {:?}", other),
    }
    assert_eq!(bob.store.get_all().await.unwrap(), vec![local]);
}

// ===========================================
// Rejection Paths
// ===========================================

#[tokio::test]
async fn wrong_code_is_authentication_error_and_changes_nothing() {
    let broker = MemoryBroker::new();
    let mallory = device(&broker, "wrong").await;
    let mut bob = device(&broker, "abc123").await;

    mallory.store.put(milk()).await.unwrap();
    mallory.session.push_tasks(&bob.identity()).await.unwrap();

    match bob.inbound.next().await.unwrap() {
        InboundSync::Rejected { from, error } => {
            assert_eq!(from, mallory.identity());
            assert!(matches!(error, SyncError::Authentication));
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
    assert!(bob.store.is_empty().await);
}

#[tokio::test]
async fn malformed_message_does_not_stop_listener() {
    let broker = MemoryBroker::new();
    let mut bob = device(&broker, "abc123").await;

    let channel = raw_peer(&broker, &bob.identity()).await;
    channel
        .send(b"definitely not an envelope".to_vec())
        .await
        .unwrap();
    channel.send(sealed("abc123", vec![milk()])).await.unwrap();

    assert!(matches!(
        bob.inbound.next().await,
        Some(InboundSync::Rejected {
            error: SyncError::Decode(_),
            ..
        })
    ));
    assert!(matches!(
        bob.inbound.next().await,
        Some(InboundSync::Received { .. })
    ));
    assert_eq!(bob.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_connection_times_out_after_ten_seconds() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let bob = device(&broker, "abc123").await;
    broker.stall_connections(true);

    let started = tokio::time::Instant::now();
    let result = alice
        .session
        .send_snapshot(&bob.identity(), &SyncSnapshot::capture(vec![milk()]))
        .await;

    match result {
        Err(SyncError::ConnectionTimeout { remote, timeout }) => {
            assert_eq!(remote, bob.identity());
            assert_eq!(timeout, Duration::from_secs(10));
        }
        other => panic!("expected ConnectionTimeout, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(broker.closed_channels(), 1);
}

#[tokio::test]
async fn send_failure_surfaces_as_transport_error() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let bob = device(&broker, "abc123").await;
    broker.fail_next_send("link down");

    let result = alice
        .session
        .send_snapshot(&bob.identity(), &SyncSnapshot::capture(vec![milk()]))
        .await;
    assert!(matches!(result, Err(SyncError::Transport(_))));
}

#[tokio::test]
async fn dropped_device_is_unreachable() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let mut bob = device(&broker, "abc123").await;
    let remote = bob.identity();

    drop(bob.session);
    assert!(bob.inbound.next().await.is_none());

    assert!(!broker.is_registered(&remote));
    let result = alice
        .session
        .send_snapshot(&remote, &SyncSnapshot::capture(vec![]))
        .await;
    assert!(matches!(result, Err(SyncError::Transport(_))));
}

#[tokio::test]
async fn closed_device_is_unreachable() {
    let broker = MemoryBroker::new();
    let alice = device(&broker, "abc123").await;
    let mut bob = device(&broker, "abc123").await;
    let remote = bob.identity();

    bob.session.close().await;

    let result = alice
        .session
        .send_snapshot(&remote, &SyncSnapshot::capture(vec![]))
        .await;
    assert!(matches!(result, Err(SyncError::Transport(_))));
}

// ===========================================
// Bootstrap Through The Session
// ===========================================

#[tokio::test]
async fn session_survives_identity_collisions() {
    let broker = MemoryBroker::new();
    broker.script_registrations([RegisterBehavior::Collide, RegisterBehavior::Collide]);

    let alice = device(&broker, "abc123").await;

    assert!(alice.identity().as_str().ends_with("-2"));
    assert_eq!(broker.registrations().len(), 3);
    assert_eq!(broker.destroyed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn silent_broker_fails_open() {
    let broker = MemoryBroker::new();
    broker.script_registrations(std::iter::repeat(RegisterBehavior::Silent).take(4));

    let mut session = SyncSession::create(
        SyncConfig::new(SyncCode::new("abc123").unwrap()),
        Arc::new(broker.clone()),
    )
    .await
    .unwrap();

    assert!(matches!(
        session.open().await,
        Err(SyncError::BootstrapExhausted { attempts: 4 })
    ));
    assert!(!session.is_open());
}
