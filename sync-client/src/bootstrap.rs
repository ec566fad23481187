//! Bootstrap driver.
//!
//! Interprets the actions of [`sync_core::BootstrapState`] against a
//! [`SignalingBroker`] and a tokio timer, feeding broker and timer outcomes
//! back in as events until the machine reaches `Open` or `Failed`.
//!
//! ```text
//! SyncSession → bootstrap() → SignalingBroker
//!                   ↓
//!        sync-core (BootstrapState)
//! ```

use std::fmt;
use std::sync::Arc;
use sync_core::{
    Action, BootstrapFailure, BootstrapNotice, BootstrapPolicy, BootstrapState, Event, RetryCause,
};
use sync_types::PeerIdentity;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerError, Registration, SignalingBroker};
use crate::error::SyncError;

/// A registration the broker acknowledged.
pub struct Bootstrapped {
    /// The identity other devices can reach us at.
    pub identity: PeerIdentity,
    /// Registration attempts made, including the successful one.
    pub attempts: u32,
    /// The live registration handle.
    pub registration: Arc<dyn Registration>,
}

impl fmt::Debug for Bootstrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrapped")
            .field("identity", &self.identity)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Register a fresh identity with `broker`, retrying per `policy`.
///
/// Superseded registrations are destroyed before the next one is created, so
/// at most one registration and one timer are live at any time. Dropping the
/// returned future drops the pending handle, which releases it at the broker.
///
/// # Errors
///
/// - [`SyncError::BootstrapExhausted`] when every attempt collided or timed out
/// - [`SyncError::BootstrapFailed`] on any other broker failure
pub async fn bootstrap(
    broker: &dyn SignalingBroker,
    policy: &BootstrapPolicy,
) -> Result<Bootstrapped, SyncError> {
    let mut driver = Driver {
        broker,
        policy,
        registration: None,
        timer: None,
    };
    let mut state = BootstrapState::new();
    let mut event = Event::Begin;

    loop {
        let (next, actions) = state.on_event(event, policy);
        state = next;
        driver.execute(actions).await;

        match &state {
            BootstrapState::Open { identity, attempt } => {
                let registration = driver.registration.take().ok_or_else(|| {
                    SyncError::Internal("bootstrap opened without a registration".into())
                })?;
                return Ok(Bootstrapped {
                    identity: identity.clone(),
                    attempts: attempt + 1,
                    registration,
                });
            }
            BootstrapState::Failed { reason } => return Err(failure_error(reason)),
            BootstrapState::Idle => {
                return Err(SyncError::Internal("bootstrap did not start".into()));
            }
            BootstrapState::Registering { .. } => {}
        }

        event = driver.next_event().await?;
    }
}

struct Driver<'a> {
    broker: &'a dyn SignalingBroker,
    policy: &'a BootstrapPolicy,
    registration: Option<Arc<dyn Registration>>,
    timer: Option<(u32, Instant)>,
}

impl Driver<'_> {
    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Register { identity, attempt } => {
                    debug!(%identity, attempt, "Registering with broker");
                    self.registration = Some(Arc::from(self.broker.register(identity)));
                }
                Action::StartTimer { attempt, delay } => {
                    self.timer = Some((attempt, Instant::now() + delay));
                }
                Action::CancelTimer => {
                    self.timer = None;
                }
                Action::DiscardRegistration => {
                    if let Some(registration) = self.registration.take() {
                        registration.destroy().await;
                    }
                }
                Action::Notify(notice) => self.report(notice),
            }
        }
    }

    /// Wait for whichever comes first: the broker's answer or the timer.
    async fn next_event(&self) -> Result<Event, SyncError> {
        let registration = self
            .registration
            .clone()
            .ok_or_else(|| SyncError::Internal("registering without a registration".into()))?;
        let (attempt, deadline) = self
            .timer
            .ok_or_else(|| SyncError::Internal("registering without a timer".into()))?;
        let identity = registration.identity().clone();

        let event = tokio::select! {
            result = registration.acknowledged() => match result {
                Ok(()) => Event::Acknowledged { identity },
                Err(BrokerError::IdentityTaken) => Event::IdentityTaken { identity },
                Err(e) => Event::BrokerFailed {
                    identity,
                    error: e.to_string(),
                },
            },
            () = tokio::time::sleep_until(deadline) => Event::TimerFired { attempt },
        };

        Ok(event)
    }

    fn report(&self, notice: BootstrapNotice) {
        match notice {
            BootstrapNotice::Opened { identity, attempt } => {
                info!(%identity, attempt, "Registered with broker");
            }
            BootstrapNotice::Retrying {
                next_attempt,
                cause,
            } => {
                let err = retry_error(cause, self.policy);
                warn!(error = %err, next_attempt, "Registration attempt failed, retrying");
            }
            BootstrapNotice::Failed { reason } => {
                if let BootstrapFailure::Exhausted { last_cause, .. } = &reason {
                    let err = retry_error(last_cause.clone(), self.policy);
                    warn!(error = %err, "Final registration attempt failed");
                }
                error!(error = %failure_error(&reason), "Bootstrap failed");
            }
        }
    }
}

fn retry_error(cause: RetryCause, policy: &BootstrapPolicy) -> SyncError {
    match cause {
        RetryCause::IdentityTaken { identity } => SyncError::IdentityCollision { identity },
        RetryCause::TimedOut { identity } => SyncError::BootstrapTimeout {
            identity,
            timeout: policy.registration_timeout,
        },
    }
}

fn failure_error(reason: &BootstrapFailure) -> SyncError {
    match reason {
        BootstrapFailure::Exhausted { attempts, .. } => SyncError::BootstrapExhausted {
            attempts: *attempts,
        },
        BootstrapFailure::Broker { error } => SyncError::BootstrapFailed(error.clone()),
        BootstrapFailure::Identity(err) => SyncError::BootstrapFailed(err.to_string()),
    }
}
