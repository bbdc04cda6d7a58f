//! In-memory activity repository.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{KindredError, KindredResult};
use crate::traits::ActivityRepository;
use crate::types::{
    DailyCounters, EmissionRecord, InteractionLevel, JournalEntry, ResponseKind, Tier,
    UserSettings, UserTierProfile,
};

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserSettings>,
    last_active: HashMap<String, DateTime<Utc>>,
    entries: HashMap<String, (JournalEntry, String)>,
    emissions: Vec<EmissionRecord>,
    counters: HashMap<(String, NaiveDate), DailyCounters>,
    engagements: HashMap<String, DateTime<Utc>>,
}

impl Inner {
    fn touch(&mut self, user_id: &str, at: DateTime<Utc>) {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| UserSettings::new(user_id, Tier::Free, InteractionLevel::Normal));
        let last = self.last_active.entry(user_id.to_string()).or_insert(at);
        if at > *last {
            *last = at;
        }
    }

    fn push_emission(&mut self, record: &EmissionRecord) -> KindredResult<()> {
        if record.response_kind == ResponseKind::Reply
            && self
                .emissions
                .iter()
                .any(|r| r.entry_id == record.entry_id && r.response_kind == ResponseKind::Reply)
        {
            return Err(KindredError::duplicate_reply(&record.entry_id));
        }
        self.emissions.push(record.clone());
        Ok(())
    }

    fn increment(&mut self, user_id: &str, date: NaiveDate, at: DateTime<Utc>) -> DailyCounters {
        let counter = self
            .counters
            .entry((user_id.to_string(), date))
            .or_insert_with(|| DailyCounters::empty(user_id, date));
        let previous = counter.clone();
        counter.emission_count += 1;
        counter.last_emission_at = Some(at);
        previous
    }

    fn profile(&self, settings: &UserSettings, active_since: DateTime<Utc>) -> UserTierProfile {
        UserTierProfile::from_settings(
            settings,
            self.last_active.get(&settings.user_id).copied(),
            active_since,
        )
    }
}

/// Volatile repository backed by hash maps.
///
/// Users that write an entry without saved settings get Free/Normal.
#[derive(Default)]
pub struct InMemoryActivityRepository {
    inner: Mutex<Inner>,
}

impl InMemoryActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KindredResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| KindredError::repository(format!("Repository lock poisoned: {}", e)))
    }

    /// Number of stored emission records.
    pub fn emission_count(&self) -> usize {
        self.lock().map(|inner| inner.emissions.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn get_active_users(&self, since: DateTime<Utc>) -> KindredResult<Vec<UserTierProfile>> {
        let inner = self.lock()?;
        let mut profiles: Vec<_> = inner
            .users
            .values()
            .map(|settings| inner.profile(settings, since))
            .filter(|p| p.is_active)
            .collect();
        profiles.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(profiles)
    }

    async fn get_user_profile(
        &self,
        user_id: &str,
        active_since: DateTime<Utc>,
    ) -> KindredResult<Option<UserTierProfile>> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .get(user_id)
            .map(|settings| inner.profile(settings, active_since)))
    }

    async fn save_user_settings(&self, settings: &UserSettings) -> KindredResult<()> {
        let mut inner = self.lock()?;
        inner.users.insert(settings.user_id.clone(), settings.clone());
        Ok(())
    }

    async fn record_entry(&self, entry: &JournalEntry, content: &str) -> KindredResult<()> {
        let mut inner = self.lock()?;
        if inner.entries.contains_key(&entry.entry_id) {
            return Err(KindredError::validation(format!(
                "Entry '{}' already recorded",
                entry.entry_id
            )));
        }
        inner.touch(&entry.user_id, entry.created_at);
        inner
            .entries
            .insert(entry.entry_id.clone(), (entry.clone(), content.to_string()));
        Ok(())
    }

    async fn get_entry_content(&self, entry_id: &str) -> KindredResult<Option<String>> {
        let inner = self.lock()?;
        Ok(inner.entries.get(entry_id).map(|(_, content)| content.clone()))
    }

    async fn get_daily_entry_sequence(&self, user_id: &str, date: NaiveDate) -> KindredResult<u32> {
        let inner = self.lock()?;
        let count = inner
            .entries
            .values()
            .filter(|(e, _)| e.user_id == user_id && e.entry_date == date)
            .count();
        Ok(count as u32)
    }

    async fn get_existing_reply(&self, entry_id: &str) -> KindredResult<Option<EmissionRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .emissions
            .iter()
            .find(|r| r.entry_id == entry_id && r.response_kind == ResponseKind::Reply)
            .cloned())
    }

    async fn persist_emission(&self, record: &EmissionRecord) -> KindredResult<()> {
        self.lock()?.push_emission(record)
    }

    async fn persist_emission_and_increment(
        &self,
        record: &EmissionRecord,
        date: NaiveDate,
    ) -> KindredResult<DailyCounters> {
        let mut inner = self.lock()?;
        inner.push_emission(record)?;
        Ok(inner.increment(&record.user_id, date, record.emitted_at))
    }

    async fn list_emissions(&self, user_id: &str) -> KindredResult<Vec<EmissionRecord>> {
        let inner = self.lock()?;
        let mut records: Vec<_> = inner
            .emissions
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.emitted_at);
        Ok(records)
    }

    async fn get_daily_counter(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> KindredResult<DailyCounters> {
        let inner = self.lock()?;
        Ok(inner
            .counters
            .get(&(user_id.to_string(), date))
            .cloned()
            .unwrap_or_else(|| DailyCounters::empty(user_id, date)))
    }

    async fn get_and_increment_daily_counter(
        &self,
        user_id: &str,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> KindredResult<DailyCounters> {
        Ok(self.lock()?.increment(user_id, date, at))
    }

    async fn record_engagement(&self, user_id: &str, at: DateTime<Utc>) -> KindredResult<()> {
        let mut inner = self.lock()?;
        inner.touch(user_id, at);
        let last = inner.engagements.entry(user_id.to_string()).or_insert(at);
        if at > *last {
            *last = at;
        }
        Ok(())
    }

    async fn last_engagement_at(&self, user_id: &str) -> KindredResult<Option<DateTime<Utc>>> {
        let inner = self.lock()?;
        Ok(inner.engagements.get(user_id).copied())
    }

    async fn purge_daily_counters_before(&self, date: NaiveDate) -> KindredResult<usize> {
        let mut inner = self.lock()?;
        let before = inner.counters.len();
        inner.counters.retain(|(_, d), _| *d >= date);
        Ok(before - inner.counters.len())
    }
}
