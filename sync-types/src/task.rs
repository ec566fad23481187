//! Task records and the snapshot that carries them between devices.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Milliseconds since the Unix epoch, the instant unit used on the wire.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single task.
///
/// The sync layer treats tasks as opaque records: it transports them and
/// hands them to the task store, but never generates or checks ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique, immutable identifier.
    pub id: String,
    /// Task text.
    pub text: String,
    /// Whether the task is done.
    pub completed: bool,
    /// Calendar date the task is due (no time component).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Creation instant (ms since epoch).
    pub created_at: u64,
    /// Last modification instant (ms since epoch).
    pub updated_at: u64,
}

impl Task {
    /// Create a new open task with a random id.
    pub fn new(text: impl Into<String>, due_date: Option<NaiveDate>) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            completed: false,
            due_date,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flip the completion flag.
    pub fn toggle_completed(&mut self) {
        self.completed = !self.completed;
        self.touch();
    }

    /// Change the due date.
    pub fn set_due_date(&mut self, due_date: Option<NaiveDate>) {
        self.due_date = due_date;
        self.touch();
    }

    fn touch(&mut self) {
        // Never move backwards, even if the wall clock does.
        self.updated_at = now_millis().max(self.updated_at);
    }
}

/// A point-in-time copy of the full task list sent during one exchange.
///
/// Wire form: `{"todos": [...], "lastSync": <ms>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Tasks in store order.
    #[serde(rename = "todos")]
    pub tasks: Vec<Task>,
    /// When the snapshot was taken (ms since epoch).
    #[serde(rename = "lastSync")]
    pub last_sync: u64,
}

impl SyncSnapshot {
    /// Capture the given tasks as of now.
    pub fn capture(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            last_sync: now_millis(),
        }
    }

    /// Canonical text form (UTF-8 JSON) that gets encrypted.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        serde_json::to_vec(self).map_err(TypesError::Serialization)
    }

    /// Parse the canonical text form.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        serde_json::from_slice(bytes).map_err(TypesError::Deserialization)
    }
}
