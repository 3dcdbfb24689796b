//! Append-only log of the frames a role has exchanged.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;

/// Which way a history entry went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    /// Sent by this role.
    Sent,
    /// Received from the peer.
    Received,
    /// A local note, e.g. an operation boundary.
    Marker,
}

impl HistoryDirection {
    fn arrow(&self) -> &'static str {
        match self {
            HistoryDirection::Sent => ">>",
            HistoryDirection::Received => "<<",
            HistoryDirection::Marker => "--",
        }
    }
}

/// One history line.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    /// When the entry was recorded.
    pub at: DateTime<Local>,
    /// Direction of travel.
    pub direction: HistoryDirection,
    /// Frame text without terminator, or the marker text.
    pub text: String,
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.at.format("%H:%M:%S%.3f"),
            self.direction.arrow(),
            self.text
        )
    }
}

/// Thread-safe command history.
#[derive(Debug, Default)]
pub struct CommandHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl CommandHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, direction: HistoryDirection, text: impl Into<String>) {
        self.records.lock().push(HistoryRecord {
            at: Local::now(),
            direction,
            text: text.into(),
        });
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every entry, oldest first.
    pub fn entries(&self) -> Vec<HistoryRecord> {
        self.records.lock().clone()
    }

    /// Entries rendered one per line.
    pub fn render(&self) -> String {
        self.records
            .lock()
            .iter()
            .map(|record| format!("{}\n", record))
            .collect()
    }
}
