//! Bombardment guard.
//!
//! Enforces the minimum spacing between two emissions to the same user and
//! the per-day emission cap. Callers hold the per-user lock from
//! [`BombardmentGuard::lock_user`] across check, emission and record so
//! that overlapping ticks cannot both pass the check.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::clock::DayBoundary;
use crate::config::{EngineConfig, PolicyTable};
use crate::error::{KindredError, KindredResult};
use crate::traits::ActivityRepository;
use crate::types::{DailyCounters, EmissionRecord, UserTierProfile};

/// Why the guard refused an emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The previous emission today is too recent.
    Spacing { ready_at: DateTime<Utc> },
    /// Today's cap is reached.
    DailyCap { cap: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    Denied(DenyReason),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Spacing and cap enforcement backed by the repository's daily counters.
pub struct BombardmentGuard {
    repository: Arc<dyn ActivityRepository>,
    policies: PolicyTable,
    min_spacing: Duration,
    day: DayBoundary,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl BombardmentGuard {
    pub fn new(
        repository: Arc<dyn ActivityRepository>,
        policies: PolicyTable,
        min_spacing: Duration,
        day: DayBoundary,
    ) -> Self {
        Self {
            repository,
            policies,
            min_spacing,
            day,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        repository: Arc<dyn ActivityRepository>,
        config: &EngineConfig,
    ) -> KindredResult<Self> {
        Ok(Self::new(
            repository,
            config.policies.clone(),
            config.min_spacing()?,
            config.day_boundary(),
        ))
    }

    /// Acquire the critical section for one user.
    pub async fn lock_user(&self, user_id: &str) -> KindredResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| KindredError::internal(format!("Guard lock table poisoned: {}", e)))?;
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// Drop lock entries nobody holds. Returns how many were removed.
    pub fn prune_idle_locks(&self) -> usize {
        match self.locks.lock() {
            Ok(mut locks) => {
                let before = locks.len();
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                before - locks.len()
            }
            Err(_) => 0,
        }
    }

    pub fn daily_cap(&self, profile: &UserTierProfile) -> u32 {
        self.policies.daily_cap(profile.tier, profile.interaction_level)
    }

    /// Today's counters for the user.
    pub async fn counters(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> KindredResult<DailyCounters> {
        self.repository
            .get_daily_counter(user_id, self.day.date_of(now))
            .await
    }

    /// Full decision with the reason for a denial.
    pub async fn check(
        &self,
        profile: &UserTierProfile,
        now: DateTime<Utc>,
    ) -> KindredResult<GuardDecision> {
        let counters = self.counters(&profile.user_id, now).await?;

        let cap = self.daily_cap(profile);
        if counters.emission_count >= cap {
            return Ok(GuardDecision::Denied(DenyReason::DailyCap { cap }));
        }

        if let Some(last) = counters.last_emission_at {
            let ready_at = last + self.min_spacing;
            if now < ready_at {
                return Ok(GuardDecision::Denied(DenyReason::Spacing { ready_at }));
            }
        }

        Ok(GuardDecision::Allowed)
    }

    /// Whether one more emission to this user is allowed right now.
    pub async fn may_emit(
        &self,
        profile: &UserTierProfile,
        now: DateTime<Utc>,
    ) -> KindredResult<bool> {
        Ok(self.check(profile, now).await?.is_allowed())
    }

    /// Persist `record` and count it against its local day in one step.
    ///
    /// On error neither happened. Returns the counters as they were before.
    pub async fn commit_emission(&self, record: &EmissionRecord) -> KindredResult<DailyCounters> {
        let date = self.day.date_of(record.emitted_at);
        let previous = self
            .repository
            .persist_emission_and_increment(record, date)
            .await?;
        tracing::debug!(
            user_id = %record.user_id,
            count = previous.emission_count + 1,
            "Recorded emission"
        );
        Ok(previous)
    }

    /// Count an emission that was stored elsewhere.
    pub async fn record_emission(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> KindredResult<DailyCounters> {
        self.repository
            .get_and_increment_daily_counter(user_id, self.day.date_of(now), now)
            .await
    }
}
