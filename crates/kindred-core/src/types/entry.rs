//! Journal entries as seen by the engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of a journal entry plus its position within the
/// user's local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Local calendar date the entry belongs to.
    pub entry_date: NaiveDate,
    /// 1-based index of this entry within `entry_date`.
    pub daily_sequence_number: u32,
}

/// An entry as handed over by the journaling API, before sequencing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    /// Caller-assigned id; generated when absent.
    #[serde(default)]
    pub entry_id: Option<String>,
    pub user_id: String,
    pub content: String,
    /// Defaults to the engine clock's current time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            entry_id: None,
            user_id: user_id.into(),
            content: content.into(),
            created_at: None,
        }
    }

    pub fn with_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}
