//! Activity repository trait.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::KindredResult;
use crate::types::{DailyCounters, EmissionRecord, JournalEntry, UserSettings, UserTierProfile};

/// Persistence boundary for entries, emissions, counters and user settings.
///
/// Implementations must make [`get_and_increment_daily_counter`] and
/// [`persist_emission_and_increment`] atomic, and must reject a second reply
/// for the same entry with [`KindredError::Conflict`](crate::KindredError::Conflict).
///
/// [`get_and_increment_daily_counter`]: ActivityRepository::get_and_increment_daily_counter
/// [`persist_emission_and_increment`]: ActivityRepository::persist_emission_and_increment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Profiles of users active since `since`.
    async fn get_active_users(&self, since: DateTime<Utc>) -> KindredResult<Vec<UserTierProfile>>;

    /// Profile snapshot of one user, `None` if the user has no settings.
    async fn get_user_profile(
        &self,
        user_id: &str,
        active_since: DateTime<Utc>,
    ) -> KindredResult<Option<UserTierProfile>>;

    /// Create or replace a user's tier settings.
    async fn save_user_settings(&self, settings: &UserSettings) -> KindredResult<()>;

    /// Store a journal entry. Counts as activity for the user.
    async fn record_entry(&self, entry: &JournalEntry, content: &str) -> KindredResult<()>;

    /// Text of a stored entry.
    async fn get_entry_content(&self, entry_id: &str) -> KindredResult<Option<String>>;

    /// Number of entries the user has on the given local date.
    async fn get_daily_entry_sequence(&self, user_id: &str, date: NaiveDate) -> KindredResult<u32>;

    /// The reply already emitted for an entry, if any.
    async fn get_existing_reply(&self, entry_id: &str) -> KindredResult<Option<EmissionRecord>>;

    /// Append an emission record.
    async fn persist_emission(&self, record: &EmissionRecord) -> KindredResult<()>;

    /// Append an emission record and count it for `date` as one unit.
    ///
    /// Either both the record and the increment land, or neither does.
    /// Returns the counters as they were before the increment.
    async fn persist_emission_and_increment(
        &self,
        record: &EmissionRecord,
        date: NaiveDate,
    ) -> KindredResult<DailyCounters>;

    /// All emissions for a user, oldest first.
    async fn list_emissions(&self, user_id: &str) -> KindredResult<Vec<EmissionRecord>>;

    /// Current counters for a user and date.
    async fn get_daily_counter(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> KindredResult<DailyCounters>;

    /// Atomically bump the counter and set `last_emission_at = at`.
    ///
    /// Returns the counters as they were before the increment.
    async fn get_and_increment_daily_counter(
        &self,
        user_id: &str,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> KindredResult<DailyCounters>;

    /// Note that the user reacted or replied to an AI response.
    async fn record_engagement(&self, user_id: &str, at: DateTime<Utc>) -> KindredResult<()>;

    /// Most recent engagement of the user.
    async fn last_engagement_at(&self, user_id: &str) -> KindredResult<Option<DateTime<Utc>>>;

    /// Drop counters for dates before `date`. Returns how many were removed.
    async fn purge_daily_counters_before(&self, date: NaiveDate) -> KindredResult<usize>;
}
