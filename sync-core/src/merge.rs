//! Merge decisions for received tasks.
//!
//! Received snapshots are applied record by record. `Append` reproduces the
//! reference behavior (every record goes to the store; the store's keying by
//! id is the only deduplication). `LastWriterWins` skips records that are not
//! newer than the local copy.

use serde::{Deserialize, Serialize};
use sync_types::Task;

/// How a received task is reconciled with the local copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Write every received task unconditionally.
    #[default]
    Append,
    /// Write a received task only if it is unknown locally or strictly newer
    /// by `updated_at`.
    LastWriterWins,
}

/// Decide whether `incoming` should be written over `local`.
pub fn should_apply(local: Option<&Task>, incoming: &Task, policy: MergePolicy) -> bool {
    match (policy, local) {
        (MergePolicy::Append, _) => true,
        (MergePolicy::LastWriterWins, None) => true,
        (MergePolicy::LastWriterWins, Some(local)) => incoming.updated_at > local.updated_at,
    }
}
