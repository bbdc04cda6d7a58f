//! Scheduler state, status and health types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of the scheduler. Only `Running` does work.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl SchedulerState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SchedulerState) -> bool {
        use SchedulerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

/// Periodic low-frequency summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub active_users: usize,
    pub pending_candidates: usize,
    pub emitted_total: u64,
    pub dropped_total: u64,
}

/// The one authoritative view of the scheduler.
///
/// Lives in a `watch` channel; `status()`, `health()` and subscribers all
/// read the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
    pub pending_candidate_count: usize,
    pub ticks_completed: u64,
    pub emitted_total: u64,
    pub deferred_total: u64,
    pub dropped_total: u64,
    pub failed_attempts_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<AnalyticsSnapshot>,
}

impl SchedulerStatus {
    /// Fold one tick's outcome into the running totals.
    pub(crate) fn absorb(&mut self, report: &TickReport) {
        self.last_tick_at = Some(report.finished_at);
        self.ticks_completed += 1;
        self.emitted_total += report.emitted as u64;
        self.deferred_total += report.deferred as u64;
        self.dropped_total += report.dropped as u64;
        self.failed_attempts_total += report.failed as u64;
        if let Some(err) = &report.last_error {
            self.last_error = Some(err.clone());
        }
    }

    /// Health derived from this status.
    ///
    /// Healthy means running with a recent tick, or running and the first
    /// tick is not yet overdue.
    pub fn health(&self, now: DateTime<Utc>, primary_interval: Duration) -> HealthReport {
        if self.state != SchedulerState::Running {
            return HealthReport {
                ok: false,
                state: self.state,
                detail: format!("scheduler is {}", self.state),
            };
        }
        let stale_after = primary_interval * 2;
        let reference = self.last_tick_at.or(self.started_at);
        match reference {
            Some(at) if now - at > stale_after => HealthReport {
                ok: false,
                state: self.state,
                detail: match self.last_tick_at {
                    Some(_) => format!("last tick at {} is stale", at.to_rfc3339()),
                    None => "no tick since start".to_string(),
                },
            },
            _ => HealthReport {
                ok: true,
                state: self.state,
                detail: match self.last_tick_at {
                    Some(at) => format!("running, last tick at {}", at.to_rfc3339()),
                    None => "running, first tick pending".to_string(),
                },
            },
        }
    }
}

/// Liveness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub state: SchedulerState,
    pub detail: String,
}

/// Which periodic job produced a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TickKind {
    /// Every user with due candidates.
    Primary,
    /// Only users that are actively engaging.
    Engaged,
    /// Out-of-band tick requested through `trigger_cycle_now`.
    Manual,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub kind: TickKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub users: usize,
    pub emitted: usize,
    pub deferred: usize,
    pub dropped: usize,
    pub failed: usize,
    /// Set when a stop request cut the tick short.
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TickReport {
    pub fn new(kind: TickKind, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            started_at,
            finished_at: started_at,
            users: 0,
            emitted: 0,
            deferred: 0,
            dropped: 0,
            failed: 0,
            cancelled: false,
            last_error: None,
        }
    }

    pub(crate) fn merge(&mut self, other: TickReport) {
        self.users += other.users;
        self.emitted += other.emitted;
        self.deferred += other.deferred;
        self.dropped += other.dropped;
        self.failed += other.failed;
        self.cancelled |= other.cancelled;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_transitions() {
        use SchedulerState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
    }

    #[test]
    fn test_health_follows_state() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let interval = Duration::minutes(5);

        let stopped = SchedulerStatus::default();
        assert!(!stopped.health(now, interval).ok);

        let mut running = SchedulerStatus {
            state: SchedulerState::Running,
            started_at: Some(now - Duration::minutes(1)),
            ..Default::default()
        };
        assert!(running.health(now, interval).ok);

        running.last_tick_at = Some(now - Duration::minutes(9));
        assert!(running.health(now, interval).ok);

        running.last_tick_at = Some(now - Duration::minutes(11));
        let report = running.health(now, interval);
        assert!(!report.ok);
        assert!(report.detail.contains("stale"));

        running.state = SchedulerState::Stopping;
        assert!(!running.health(now, interval).ok);
    }

    #[test]
    fn test_absorb_accumulates() {
        let now = Utc::now();
        let mut status = SchedulerStatus::default();
        let mut report = TickReport::new(TickKind::Primary, now);
        report.emitted = 2;
        report.dropped = 1;
        report.last_error = Some("boom".to_string());
        status.absorb(&report);
        status.absorb(&TickReport::new(TickKind::Engaged, now));

        assert_eq!(status.ticks_completed, 2);
        assert_eq!(status.emitted_total, 2);
        assert_eq!(status.dropped_total, 1);
        assert_eq!(status.last_error.as_deref(), Some("boom"));
        assert_eq!(status.last_tick_at, Some(now));
    }
}
