//! iCalendar rendering of tasks with due dates.
//!
//! Stateless: tasks in, `VCALENDAR` text out. Tasks without a due date are
//! skipped.

use chrono::{DateTime, Utc};
use sync_types::Task;

/// Suffix appended to task ids to form event UIDs.
pub const UID_DOMAIN: &str = "todos-app";

/// Calendar envelope options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarFeed {
    /// Display name for subscribed feeds; `None` for a one-off export.
    pub name: Option<String>,
}

impl CalendarFeed {
    /// A plain export, as produced by a "download .ics" action.
    pub fn export() -> Self {
        Self::default()
    }

    /// A subscribable feed that asks clients to refresh hourly.
    pub fn published(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Render `tasks` into a complete calendar.
    pub fn render(&self, tasks: &[Task]) -> String {
        let mut lines = vec![
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            "PRODID:-//Todos App//EN".to_string(),
            "CALSCALE:GREGORIAN".to_string(),
        ];

        if let Some(name) = &self.name {
            lines.push(format!("X-WR-CALNAME:{}", escape_text(name)));
            lines.push("REFRESH-INTERVAL;VALUE=DURATION:PT1H".to_string());
            lines.push("X-PUBLISHED-TTL:PT1H".to_string());
        }

        for task in tasks {
            if let Some(event) = render_event(task) {
                lines.push(event);
            }
        }

        lines.push("END:VCALENDAR".to_string());
        lines.join("\n")
    }
}

/// Render tasks as a plain calendar export.
pub fn render_calendar(tasks: &[Task]) -> String {
    CalendarFeed::export().render(tasks)
}

/// Render one `VEVENT` block, or `None` when the task has no due date.
pub fn render_event(task: &Task) -> Option<String> {
    let due = task.due_date?;

    let (suffix, status) = if task.completed {
        (" (Completed)", "COMPLETED")
    } else {
        ("", "NEEDS-ACTION")
    };

    Some(
        [
            "BEGIN:VEVENT".to_string(),
            format!("UID:{}@{}", task.id, UID_DOMAIN),
            format!("DTSTAMP:{}", format_timestamp(task.created_at)),
            format!("DTSTART;VALUE=DATE:{}", due.format("%Y%m%d")),
            format!("SUMMARY:{}{}", escape_text(&task.text), suffix),
            format!("STATUS:{}", status),
            "END:VEVENT".to_string(),
        ]
        .join("\n"),
    )
}

/// UTC basic format with seconds precision, e.g. `20240601T120000Z`.
fn format_timestamp(millis: u64) -> String {
    let instant = i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default();
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escape a TEXT value (RFC 5545 section 3.3.11).
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}
