//! One pass over the candidate queue, plus the analytics and maintenance jobs.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use tokio_util::sync::CancellationToken;

use super::state::{AnalyticsSnapshot, SchedulerState, TickKind, TickReport};
use super::SchedulerCore;
use crate::coordinator::EmitOutcome;
use crate::error::{KindredError, KindredResult};
use crate::events::{DropReason, EngineEvent};
use crate::types::ResponseCandidate;

impl SchedulerCore {
    /// Run one tick. Fails with `InvalidState` unless running.
    pub(super) async fn run_tick(&self, kind: TickKind) -> KindredResult<TickReport> {
        let _gate = self.gate.read().await;
        let state = self.current_state();
        if state != SchedulerState::Running {
            let operation = match kind {
                TickKind::Manual => "trigger_cycle_now",
                _ => "tick",
            };
            return Err(KindredError::invalid_state(operation, state));
        }

        let token = self.cancel_token();
        let started_at = self.clock.now();
        let mut report = TickReport::new(kind, started_at);

        report.dropped += self.drop_expired(started_at)?;

        let engaged = match kind {
            TickKind::Engaged => Some(self.engaged_users(started_at).await?),
            _ => None,
        };
        let groups = self.queue.due(started_at, |user_id| {
            engaged
                .as_ref()
                .map_or(true, |users| users.contains(user_id))
        })?;
        report.users = groups.len();

        let total = StdMutex::new(report);
        stream::iter(groups)
            .for_each_concurrent(self.config.max_concurrent_users, |(user_id, candidates)| {
                let token = token.clone();
                let total = &total;
                async move {
                    let partial = self.process_user(kind, &user_id, candidates, &token).await;
                    match total.lock() {
                        Ok(mut t) => t.merge(partial),
                        Err(e) => e.into_inner().merge(partial),
                    }
                }
            })
            .await;

        let mut report = total.into_inner().unwrap_or_else(|e| e.into_inner());
        report.cancelled |= token.is_cancelled();
        report.finished_at = self.clock.now();
        self.state.send_modify(|s| s.absorb(&report));
        Ok(report)
    }

    /// Work through one user's due candidates in order.
    ///
    /// Stops at the first guard denial: later candidates would be denied
    /// for the same reason.
    async fn process_user(
        &self,
        kind: TickKind,
        user_id: &str,
        candidates: Vec<ResponseCandidate>,
        token: &CancellationToken,
    ) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::new(kind, now);
        let lookup = match self.config.activity_window() {
            Ok(window) => self.repository.get_user_profile(user_id, now - window).await,
            Err(e) => Err(e),
        };

        let profile = match lookup {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::warn!(user_id, "Pending candidates for unknown user");
                for candidate in &candidates {
                    if let Some(Some(_)) = self.settle(self.queue.remove(candidate.candidate_id)) {
                        self.announce_drop(candidate, DropReason::UnknownUser, now);
                        report.dropped += 1;
                    }
                }
                return report;
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    error = %e,
                    "Failed to load user profile, retrying next tick"
                );
                for candidate in &candidates {
                    self.settle(self.queue.record_failure(candidate.candidate_id));
                }
                report.failed += candidates.len();
                report.last_error = Some(e.to_string());
                return report;
            }
        };

        for queued in candidates {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let checked_out = self.settle(self.queue.checkout(queued.candidate_id));
            let Some(Some(mut candidate)) = checked_out else {
                continue;
            };

            let now = self.clock.now();
            match self.coordinator.emit(&mut candidate, &profile, now).await {
                Ok(EmitOutcome::Emitted(_)) => {
                    self.settle(self.queue.remove(candidate.candidate_id));
                    report.emitted += 1;
                }
                Ok(EmitOutcome::Deferred(_)) => {
                    self.settle(self.queue.release(candidate.candidate_id));
                    report.deferred += 1;
                    break;
                }
                Ok(EmitOutcome::Discarded(_)) => {
                    self.settle(self.queue.remove(candidate.candidate_id));
                    report.dropped += 1;
                }
                Err(e) if e.is_retryable() => {
                    let attempts = self
                        .settle(self.queue.record_failure(candidate.candidate_id))
                        .unwrap_or(candidate.attempts + 1);
                    tracing::warn!(
                        user_id,
                        candidate_id = %candidate.candidate_id,
                        attempts,
                        error = %e,
                        "Emission failed, will retry"
                    );
                    self.events.emit(EngineEvent::EmissionFailed {
                        candidate_id: candidate.candidate_id,
                        user_id: user_id.to_string(),
                        error: e.to_string(),
                        attempts,
                        timestamp: now,
                    });
                    report.failed += 1;
                    report.last_error = Some(e.to_string());
                }
                Err(e) => {
                    tracing::error!(
                        user_id,
                        candidate_id = %candidate.candidate_id,
                        error = %e,
                        "Emission failed permanently"
                    );
                    self.settle(self.queue.remove(candidate.candidate_id));
                    self.announce_drop(&candidate, DropReason::Configuration, now);
                    report.dropped += 1;
                    report.last_error = Some(e.to_string());
                }
            }
        }

        report
    }

    /// Users with queued candidates who engaged inside the window.
    pub(super) async fn engaged_users(&self, now: DateTime<Utc>) -> KindredResult<HashSet<String>> {
        let since = now - self.config.engagement_window()?;
        let mut engaged = HashSet::new();
        for user_id in self.queue.users()? {
            match self.repository.last_engagement_at(&user_id).await {
                Ok(Some(at)) if at >= since => {
                    engaged.insert(user_id);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Engagement lookup failed")
                }
            }
        }
        Ok(engaged)
    }

    /// Drop everything past its horizon. Returns how many were dropped.
    fn drop_expired(&self, now: DateTime<Utc>) -> KindredResult<usize> {
        let expired = self
            .queue
            .purge_expired(now, self.config.candidate_horizon()?)?;
        for candidate in &expired {
            self.announce_drop(candidate, DropReason::Expired, now);
        }
        Ok(expired.len())
    }

    pub(super) async fn run_analytics(&self) -> KindredResult<AnalyticsSnapshot> {
        let now = self.clock.now();
        let active_users = self
            .repository
            .get_active_users(now - self.config.activity_window()?)
            .await?
            .len();

        let (emitted_total, dropped_total) = {
            let status = self.state.borrow();
            (status.emitted_total, status.dropped_total)
        };
        let snapshot = AnalyticsSnapshot {
            taken_at: now,
            active_users,
            pending_candidates: self.queue.len(),
            emitted_total,
            dropped_total,
        };

        tracing::info!(
            active_users,
            pending = snapshot.pending_candidates,
            emitted_total,
            dropped_total,
            "Analytics snapshot"
        );
        self.state
            .send_modify(|s| s.last_snapshot = Some(snapshot.clone()));
        Ok(snapshot)
    }

    pub(super) async fn run_maintenance(&self) -> KindredResult<usize> {
        let now = self.clock.now();
        let dropped = self.drop_expired(now)?;
        if dropped > 0 {
            self.state.send_modify(|s| s.dropped_total += dropped as u64);
        }

        let cutoff = self.config.day_boundary().date_of(now) - self.config.counter_retention()?;
        let purged = self.repository.purge_daily_counters_before(cutoff).await?;
        let pruned = self.coordinator.guard().prune_idle_locks();

        tracing::info!(
            expired = dropped,
            counters_purged = purged,
            locks_pruned = pruned,
            "Maintenance finished"
        );
        Ok(dropped)
    }

    fn announce_drop(
        &self,
        candidate: &ResponseCandidate,
        reason: DropReason,
        now: DateTime<Utc>,
    ) {
        tracing::info!(
            user_id = %candidate.user_id,
            candidate_id = %candidate.candidate_id,
            %reason,
            "Dropped response opportunity"
        );
        self.events.emit(EngineEvent::CandidateDropped {
            candidate_id: candidate.candidate_id,
            user_id: candidate.user_id.clone(),
            entry_id: candidate.entry_id.clone(),
            reason,
            timestamp: now,
        });
    }

    /// Log queue bookkeeping errors instead of failing the tick.
    fn settle<T>(&self, result: KindredResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "Candidate queue operation failed");
                None
            }
        }
    }
}
