//! # sync-core
//!
//! Pure logic for todo-sync (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms for sync
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without network, disk or timer side effects. Identity and sync-code
//! generation are the exception: they read the OS CSPRNG, and peer
//! identities embed the wall clock. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic transitions (same state + event → same shape of result)
//! - Easy reasoning about retry and timeout handling
//!
//! The actual I/O (broker, timers, channels) is performed by `sync-client`,
//! which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod calendar;
pub mod identity;
pub mod merge;

pub use bootstrap::{
    Action, BootstrapFailure, BootstrapNotice, BootstrapPolicy, BootstrapState, Event,
    RetryCause, MAX_RETRIES, REGISTRATION_TIMEOUT,
};
pub use calendar::{render_calendar, render_event, CalendarFeed};
pub use identity::{
    generate_peer_identity, generate_sync_code, peer_identity_from_parts, IdentityError,
};
pub use merge::{should_apply, MergePolicy};
