//! Task persistence collaborator.
//!
//! The session never owns the task list. It reads snapshots from, and merges
//! received tasks into, whatever [`TaskStore`] the application attaches.

use async_trait::async_trait;
use sync_core::{should_apply, MergePolicy};
use sync_types::{SyncSnapshot, Task};
use thiserror::Error;
use tokio::sync::RwLock;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Where tasks live.
///
/// Implementations serialize their own writes; the session issues at most
/// one merge at a time.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks in display order.
    async fn get_all(&self) -> Result<Vec<Task>, StoreError>;

    /// One task by id.
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Insert or replace a task, keyed by id.
    async fn put(&self, task: Task) -> Result<(), StoreError>;

    /// Remove a task. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// In-memory store keeping insertion order.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `tasks`.
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks),
        }
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.read().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn put(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        Ok(tasks.len() != before)
    }
}

/// Outcome of merging one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Ids written to the store.
    pub applied: Vec<String>,
    /// Ids left alone because the local copy was at least as new.
    pub skipped: Vec<String>,
}

impl MergeReport {
    /// Number of tasks received.
    pub fn total(&self) -> usize {
        self.applied.len() + self.skipped.len()
    }
}

/// Merge every task of `snapshot` into `store` under `policy`.
pub async fn apply_snapshot(
    store: &dyn TaskStore,
    snapshot: &SyncSnapshot,
    policy: MergePolicy,
) -> Result<MergeReport, StoreError> {
    let mut report = MergeReport::default();

    for incoming in &snapshot.tasks {
        let local = match policy {
            MergePolicy::Append => None,
            MergePolicy::LastWriterWins => store.get(&incoming.id).await?,
        };

        if should_apply(local.as_ref(), incoming, policy) {
            store.put(incoming.clone()).await?;
            report.applied.push(incoming.id.clone());
        } else {
            report.skipped.push(incoming.id.clone());
        }
    }

    Ok(report)
}

/// Snapshot the whole store, stamped with the current time.
pub async fn capture_snapshot(store: &dyn TaskStore) -> Result<SyncSnapshot, StoreError> {
    Ok(SyncSnapshot::capture(store.get_all().await?))
}
