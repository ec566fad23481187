//! Bootstrap state machine for todo-sync.
//!
//! Registers an ephemeral identity with the signaling broker, retrying with a
//! brand-new identity when the broker reports a collision or stays silent
//! past the registration timeout.
//!
//! The state machine takes events as input and produces a new state plus a
//! list of actions to execute. It performs no broker calls and arms no
//! timers; those live in sync-client, so every transition here is testable
//! without a network or a runtime. Entering `Registering` draws a fresh
//! identity from [`generate_peer_identity`], which reads the OS CSPRNG and
//! the wall clock, so identities differ between runs while the shape of
//! each transition does not.

use std::time::Duration;
use sync_types::PeerIdentity;

use crate::identity::{generate_peer_identity, IdentityError};

/// How long a single registration attempt may wait for acknowledgement.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries after the initial attempt before giving up.
pub const MAX_RETRIES: u32 = 3;

/// Tunables for the bootstrap state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapPolicy {
    /// Registration acknowledgement timeout per attempt.
    pub registration_timeout: Duration,
    /// Retries allowed after attempt 0.
    pub max_retries: u32,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            registration_timeout: REGISTRATION_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

/// Bootstrap state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    /// Nothing registered yet.
    Idle,
    /// Waiting for the broker to acknowledge `identity`.
    Registering {
        /// Zero-based attempt number.
        attempt: u32,
        /// Identity registered in this attempt.
        identity: PeerIdentity,
    },
    /// Identity acknowledged; inbound and outbound connections are possible.
    Open {
        /// The registered identity.
        identity: PeerIdentity,
        /// Attempt that succeeded.
        attempt: u32,
    },
    /// Terminal until the caller explicitly begins again.
    Failed {
        /// Why bootstrap gave up.
        reason: BootstrapFailure,
    },
}

impl BootstrapState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// Events that name an identity or attempt other than the current one are
    /// stale and leave the state untouched.
    pub fn on_event(self, event: Event, policy: &BootstrapPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // Begin (or explicit restart after failure)
            (Self::Idle, Event::Begin) | (Self::Failed { .. }, Event::Begin) => {
                register_attempt(0, policy, Vec::new())
            }

            // Acknowledged before the timer fired
            (Self::Registering { attempt, identity }, Event::Acknowledged { identity: acked })
                if acked == identity =>
            {
                (
                    Self::Open {
                        identity: identity.clone(),
                        attempt,
                    },
                    vec![
                        Action::CancelTimer,
                        Action::Notify(BootstrapNotice::Opened { identity, attempt }),
                    ],
                )
            }

            // Collision: the broker already knows this identity
            (Self::Registering { attempt, identity }, Event::IdentityTaken { identity: taken })
                if taken == identity =>
            {
                retry(attempt, RetryCause::IdentityTaken { identity }, policy)
            }

            // Timeout for the live attempt
            (Self::Registering { attempt, identity }, Event::TimerFired { attempt: fired })
                if fired == attempt =>
            {
                retry(attempt, RetryCause::TimedOut { identity }, policy)
            }

            // Any other broker error is terminal
            (
                Self::Registering { identity, .. },
                Event::BrokerFailed {
                    identity: failed,
                    error,
                },
            ) if failed == identity => fail(BootstrapFailure::Broker { error }),

            // Stale or invalid - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the identity is registered.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if registration is in progress.
    pub fn is_registering(&self) -> bool {
        matches!(self, Self::Registering { .. })
    }

    /// The identity currently registered or being registered.
    pub fn identity(&self) -> Option<&PeerIdentity> {
        match self {
            Self::Registering { identity, .. } | Self::Open { identity, .. } => Some(identity),
            Self::Idle | Self::Failed { .. } => None,
        }
    }
}

impl Default for BootstrapState {
    fn default() -> Self {
        Self::new()
    }
}

fn register_attempt(
    attempt: u32,
    policy: &BootstrapPolicy,
    mut actions: Vec<Action>,
) -> (BootstrapState, Vec<Action>) {
    let identity = match generate_peer_identity(attempt) {
        Ok(identity) => identity,
        Err(err) => {
            let (state, mut tail) = fail(BootstrapFailure::Identity(err));
            actions.append(&mut tail);
            return (state, actions);
        }
    };

    actions.push(Action::Register {
        identity: identity.clone(),
        attempt,
    });
    actions.push(Action::StartTimer {
        attempt,
        delay: policy.registration_timeout,
    });

    (BootstrapState::Registering { attempt, identity }, actions)
}

fn retry(
    attempt: u32,
    cause: RetryCause,
    policy: &BootstrapPolicy,
) -> (BootstrapState, Vec<Action>) {
    if attempt >= policy.max_retries {
        return fail(BootstrapFailure::Exhausted {
            attempts: attempt.saturating_add(1),
            last_cause: cause,
        });
    }

    let next = attempt + 1;
    let actions = vec![
        Action::CancelTimer,
        Action::DiscardRegistration,
        Action::Notify(BootstrapNotice::Retrying {
            next_attempt: next,
            cause,
        }),
    ];
    register_attempt(next, policy, actions)
}

fn fail(reason: BootstrapFailure) -> (BootstrapState, Vec<Action>) {
    (
        BootstrapState::Failed {
            reason: reason.clone(),
        },
        vec![
            Action::CancelTimer,
            Action::DiscardRegistration,
            Action::Notify(BootstrapNotice::Failed { reason }),
        ],
    )
}

/// Events that can occur while bootstrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller asked to start (or restart) bootstrap.
    Begin,
    /// Broker acknowledged the registration.
    Acknowledged {
        /// Identity the acknowledgement is for.
        identity: PeerIdentity,
    },
    /// Broker reported the identity is already in use.
    IdentityTaken {
        /// Identity that collided.
        identity: PeerIdentity,
    },
    /// Registration timer expired.
    TimerFired {
        /// Attempt the timer was started for.
        attempt: u32,
    },
    /// Broker reported an error other than a collision.
    BrokerFailed {
        /// Identity the error is for.
        identity: PeerIdentity,
        /// Error message describing the failure.
        error: String,
    },
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Create a broker registration for `identity`.
    Register {
        /// Identity to register.
        identity: PeerIdentity,
        /// Attempt number.
        attempt: u32,
    },
    /// Start the registration timer, replacing any previous one.
    StartTimer {
        /// Attempt the timer belongs to.
        attempt: u32,
        /// Delay before it fires.
        delay: Duration,
    },
    /// Cancel the pending registration timer.
    CancelTimer,
    /// Destroy the current registration handle.
    DiscardRegistration,
    /// Report progress to the application.
    Notify(BootstrapNotice),
}

/// Why an attempt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCause {
    /// The broker already had this identity.
    IdentityTaken {
        /// The abandoned identity.
        identity: PeerIdentity,
    },
    /// No acknowledgement within the timeout.
    TimedOut {
        /// The abandoned identity.
        identity: PeerIdentity,
    },
}

/// Why bootstrap reached `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapFailure {
    /// Every allowed attempt collided or timed out.
    Exhausted {
        /// Total attempts made (initial + retries).
        attempts: u32,
        /// What went wrong on the final attempt.
        last_cause: RetryCause,
    },
    /// The broker returned a non-collision error.
    Broker {
        /// Error message from the broker.
        error: String,
    },
    /// No identity could be generated.
    Identity(IdentityError),
}

/// Progress notices emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapNotice {
    /// Registration acknowledged.
    Opened {
        /// Registered identity.
        identity: PeerIdentity,
        /// Attempt that succeeded.
        attempt: u32,
    },
    /// An attempt was abandoned and a new one is starting.
    Retrying {
        /// Attempt about to start.
        next_attempt: u32,
        /// Why the previous one was abandoned.
        cause: RetryCause,
    },
    /// Bootstrap gave up.
    Failed {
        /// Why.
        reason: BootstrapFailure,
    },
}
