//! Background scheduler.
//!
//! Owns the periodic jobs that drain the candidate queue:
//! - primary tick over every user with due candidates
//! - accelerated tick for users who are actively engaging
//! - analytics snapshot
//! - daily maintenance
//!
//! All state lives in one `watch` channel. A fresh `JobScheduler` is built
//! on every start and shut down on stop.

mod state;
mod tick;

pub use state::{
    AnalyticsSnapshot, HealthReport, SchedulerState, SchedulerStatus, TickKind, TickReport,
};

use chrono::Duration as ChronoDuration;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::{EngineConfig, ScheduleConfig, MAX_INTERVAL_SECS};
use crate::coordinator::EmissionCoordinator;
use crate::error::{KindredError, KindredResult};
use crate::events::{EngineEvent, EventBus};
use crate::queue::CandidateQueue;
use crate::traits::ActivityRepository;

/// Handle to the scheduler. Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

pub(crate) struct SchedulerCore {
    repository: Arc<dyn ActivityRepository>,
    coordinator: Arc<EmissionCoordinator>,
    queue: Arc<CandidateQueue>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    events: EventBus,
    state: watch::Sender<SchedulerStatus>,
    /// Ticks hold a read guard; stop takes the write guard to wait them out.
    gate: RwLock<()>,
    cancel: StdMutex<CancellationToken>,
    jobs: Mutex<Option<JobScheduler>>,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn ActivityRepository>,
        coordinator: Arc<EmissionCoordinator>,
        queue: Arc<CandidateQueue>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        events: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerStatus::default());
        Self {
            core: Arc::new(SchedulerCore {
                repository,
                coordinator,
                queue,
                clock,
                config,
                events,
                state,
                gate: RwLock::new(()),
                cancel: StdMutex::new(CancellationToken::new()),
                jobs: Mutex::new(None),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    /// Start the periodic jobs. Starting a running scheduler is a no-op.
    pub async fn start(&self) -> KindredResult<()> {
        let _lifecycle = self.core.lifecycle.lock().await;
        match self.core.current_state() {
            SchedulerState::Running => return Ok(()),
            SchedulerState::Stopped => {}
            other => return Err(KindredError::invalid_state("start", other)),
        }

        self.core.transition(SchedulerState::Starting);
        *self.core.cancel_slot()? = CancellationToken::new();

        let jobs = match self.build_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start scheduler");
                self.core.transition(SchedulerState::Stopped);
                return Err(e);
            }
        };
        *self.core.jobs.lock().await = Some(jobs);

        let now = self.core.clock.now();
        self.core.state.send_modify(|s| s.started_at = Some(now));
        self.core.transition(SchedulerState::Running);

        if self.core.config.schedule.run_on_start {
            let core = self.core.clone();
            tokio::spawn(async move {
                core.scheduled_tick(TickKind::Primary).await;
            });
        }
        Ok(())
    }

    /// Stop the jobs, letting any in-flight tick finish its current
    /// candidate. Stopping a stopped scheduler is a no-op.
    pub async fn stop(&self) -> KindredResult<()> {
        let _lifecycle = self.core.lifecycle.lock().await;
        match self.core.current_state() {
            SchedulerState::Stopped => return Ok(()),
            SchedulerState::Running => {}
            other => return Err(KindredError::invalid_state("stop", other)),
        }

        self.core.transition(SchedulerState::Stopping);
        self.core.cancel_slot()?.cancel();

        // Waits until every in-flight tick has returned
        let _drained = self.core.gate.write().await;

        let jobs = self.core.jobs.lock().await.take();
        let mut result = Ok(());
        if let Some(mut jobs) = jobs {
            if let Err(e) = jobs.shutdown().await {
                tracing::warn!(error = %e, "Job scheduler shutdown reported an error");
                result = Err(e.into());
            }
        }

        self.core.state.send_modify(|s| s.started_at = None);
        self.core.transition(SchedulerState::Stopped);
        result
    }

    /// Run one primary tick now, outside the periodic schedule.
    ///
    /// Rejected unless the scheduler is running.
    pub async fn trigger_cycle_now(&self) -> KindredResult<TickReport> {
        self.core.run_tick(TickKind::Manual).await
    }

    /// Current status with a live pending count.
    pub fn status(&self) -> SchedulerStatus {
        let mut status = self.core.state.borrow().clone();
        status.pending_candidate_count = self.core.queue.len();
        status
    }

    pub fn health(&self) -> HealthReport {
        let now = self.core.clock.now();
        self.core
            .state
            .borrow()
            .health(now, self.core.primary_interval())
    }

    pub fn state(&self) -> SchedulerState {
        self.core.current_state()
    }

    /// Observe status changes.
    pub fn watch_state(&self) -> watch::Receiver<SchedulerStatus> {
        self.core.state.subscribe()
    }

    /// Run the analytics snapshot job once.
    pub async fn snapshot_now(&self) -> KindredResult<AnalyticsSnapshot> {
        self.core.run_analytics().await
    }

    /// Run the maintenance job once. Returns the number of expired
    /// candidates dropped.
    pub async fn maintain_now(&self) -> KindredResult<usize> {
        self.core.run_maintenance().await
    }

    async fn build_jobs(&self) -> KindredResult<JobScheduler> {
        let schedule: &ScheduleConfig = &self.core.config.schedule;
        let jobs = JobScheduler::new().await?;

        jobs.add(self.repeated(TickKind::Primary, schedule.primary_interval_secs)?)
            .await?;
        jobs.add(self.repeated(TickKind::Engaged, schedule.engaged_interval_secs)?)
            .await?;

        let core = self.core.clone();
        jobs.add(Job::new_repeated_async(
            Duration::from_secs(schedule.analytics_interval_secs),
            move |_uuid, _lock| {
                let core = core.clone();
                Box::pin(async move {
                    if core.current_state() != SchedulerState::Running {
                        return;
                    }
                    if let Err(e) = core.run_analytics().await {
                        tracing::warn!(error = %e, "Analytics snapshot failed");
                    }
                })
            },
        )?)
        .await?;

        let core = self.core.clone();
        jobs.add(Job::new_async(
            schedule.maintenance_cron.as_str(),
            move |_uuid, _lock| {
                let core = core.clone();
                Box::pin(async move {
                    if core.current_state() != SchedulerState::Running {
                        return;
                    }
                    if let Err(e) = core.run_maintenance().await {
                        tracing::warn!(error = %e, "Maintenance failed");
                    }
                })
            },
        )?)
        .await?;

        jobs.start().await?;
        tracing::info!(
            primary_secs = schedule.primary_interval_secs,
            engaged_secs = schedule.engaged_interval_secs,
            analytics_secs = schedule.analytics_interval_secs,
            maintenance = %schedule.maintenance_cron,
            "Scheduler jobs started"
        );
        Ok(jobs)
    }

    fn repeated(&self, kind: TickKind, every_secs: u64) -> KindredResult<Job> {
        let core = self.core.clone();
        let job = Job::new_repeated_async(Duration::from_secs(every_secs), move |_uuid, _lock| {
            let core = core.clone();
            Box::pin(async move {
                core.scheduled_tick(kind).await;
            })
        })?;
        Ok(job)
    }
}

impl SchedulerCore {
    fn current_state(&self) -> SchedulerState {
        self.state.borrow().state
    }

    fn primary_interval(&self) -> ChronoDuration {
        let secs = self.config.schedule.primary_interval_secs.min(MAX_INTERVAL_SECS);
        ChronoDuration::try_seconds(secs as i64).unwrap_or_else(|| ChronoDuration::days(1))
    }

    fn cancel_slot(&self) -> KindredResult<std::sync::MutexGuard<'_, CancellationToken>> {
        self.cancel
            .lock()
            .map_err(|e| KindredError::internal(format!("Cancellation slot poisoned: {}", e)))
    }

    fn cancel_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }

    fn transition(&self, next: SchedulerState) {
        let mut from = next;
        self.state.send_modify(|s| {
            from = s.state;
            if !s.state.can_transition_to(next) {
                tracing::warn!(from = %s.state, to = %next, "Unexpected scheduler transition");
            }
            s.state = next;
        });
        tracing::info!(%from, to = %next, "Scheduler state changed");
        self.events.emit(EngineEvent::StateChanged {
            from,
            to: next,
            timestamp: self.clock.now(),
        });
    }

    /// Tick entry point for jobs: quiet when not running, never fails.
    async fn scheduled_tick(&self, kind: TickKind) {
        if self.current_state() != SchedulerState::Running {
            return;
        }
        match self.run_tick(kind).await {
            Ok(report) if report.users > 0 => {
                tracing::debug!(
                    %kind,
                    users = report.users,
                    emitted = report.emitted,
                    deferred = report.deferred,
                    dropped = report.dropped,
                    failed = report.failed,
                    "Tick finished"
                );
            }
            Ok(_) => {}
            Err(e) if matches!(e, KindredError::InvalidState { .. }) => {}
            Err(e) => tracing::warn!(%kind, error = %e, "Tick failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::guard::BombardmentGuard;
    use crate::store::InMemoryActivityRepository;
    use crate::traits::{GenerationRequest, MockResponseGenerator, ResponseGenerator};
    use crate::types::{JournalEntry, PersonaId, ResponseCandidate, ResponseKind};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::Notify;

    struct Fixture {
        scheduler: Scheduler,
        repo: Arc<InMemoryActivityRepository>,
        queue: Arc<CandidateQueue>,
        clock: Arc<ManualClock>,
        guard: Arc<BombardmentGuard>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
    }

    fn fixture_with(config: EngineConfig, generator: Arc<dyn ResponseGenerator>) -> Fixture {
        let repo = Arc::new(InMemoryActivityRepository::new());
        let shared: Arc<dyn ActivityRepository> = repo.clone();
        let guard = Arc::new(BombardmentGuard::from_config(shared.clone(), &config).unwrap());
        let events = EventBus::new();
        let coordinator = EmissionCoordinator::new(
            shared.clone(),
            generator,
            guard.clone(),
            &config,
            events.clone(),
        )
        .unwrap();
        let coordinator = Arc::new(coordinator);
        let queue = Arc::new(CandidateQueue::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let scheduler =
            Scheduler::new(shared, coordinator, queue.clone(), clock.clone(), config, events);
        Fixture {
            scheduler,
            repo,
            queue,
            clock,
            guard,
        }
    }

    fn fixture() -> Fixture {
        let mut generator = MockResponseGenerator::new();
        generator.expect_generate().returning(|_| Ok("hello".to_string()));
        fixture_with(EngineConfig::default(), Arc::new(generator))
    }

    fn scheduler() -> Scheduler {
        fixture().scheduler
    }

    impl Fixture {
        /// Record an entry for `user_id` and queue one reaction that is due
        /// `due_in` after the entry.
        async fn queue_reaction(&self, user_id: &str, at: DateTime<Utc>, due_in: ChronoDuration) {
            let entry = JournalEntry {
                entry_id: format!("{}-entry", user_id),
                user_id: user_id.to_string(),
                created_at: at,
                entry_date: at.date_naive(),
                daily_sequence_number: 1,
            };
            if self.repo.get_entry_content(&entry.entry_id).await.unwrap().is_none() {
                self.repo.record_entry(&entry, "Quiet morning").await.unwrap();
            }
            let candidate = ResponseCandidate::new(
                entry.entry_id,
                user_id,
                PersonaId::from("pulse"),
                ResponseKind::Reaction,
                at,
                due_in,
            );
            self.queue.push(candidate).unwrap();
        }
    }

    #[tokio::test]
    async fn test_trigger_rejected_when_stopped() {
        let scheduler = scheduler();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        let err = scheduler.trigger_cycle_now().await.unwrap_err();
        assert!(matches!(err, KindredError::InvalidState { .. }));
        assert_eq!(scheduler.status().ticks_completed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_stop_cycle() {
        let scheduler = scheduler();
        let mut watcher = scheduler.watch_state();

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(watcher.has_changed().unwrap());
        assert_eq!(watcher.borrow_and_update().state, SchedulerState::Running);
        assert!(scheduler.health().ok);

        // Idempotent
        scheduler.start().await.unwrap();

        let report = scheduler.trigger_cycle_now().await.unwrap();
        assert_eq!(report.kind, TickKind::Manual);
        assert_eq!(scheduler.status().ticks_completed, 1);

        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.health().ok);
        scheduler.stop().await.unwrap();

        // Restartable with a fresh job scheduler
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_and_health_agree() {
        let scheduler = scheduler();
        let clone = scheduler.clone();
        scheduler.start().await.unwrap();
        assert_eq!(clone.status().state, SchedulerState::Running);
        assert_eq!(clone.health().state, scheduler.status().state);
        clone.stop().await.unwrap();
        assert_eq!(scheduler.status().state, SchedulerState::Stopped);
        assert_eq!(scheduler.health().state, SchedulerState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engaged_tick_skips_users_not_engaging() {
        let f = fixture();
        f.queue_reaction("u1", t0(), ChronoDuration::minutes(1)).await;
        f.queue_reaction("u2", t0(), ChronoDuration::minutes(1)).await;
        f.repo.record_engagement("u1", t0()).await.unwrap();
        f.clock.advance(ChronoDuration::minutes(2));

        f.scheduler.start().await.unwrap();
        let report = f.scheduler.core.run_tick(TickKind::Engaged).await.unwrap();
        assert_eq!(report.kind, TickKind::Engaged);
        assert_eq!(report.users, 1);
        assert_eq!(report.emitted, 1);

        assert_eq!(f.repo.list_emissions("u1").await.unwrap().len(), 1);
        assert!(f.repo.list_emissions("u2").await.unwrap().is_empty());
        assert_eq!(f.queue.users().unwrap(), vec!["u2".to_string()]);

        // The primary tick still serves everyone
        let report = f.scheduler.trigger_cycle_now().await.unwrap();
        assert_eq!(report.emitted, 1);
        assert!(f.queue.is_empty());
        f.scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_engagement_outside_window_is_not_engaged() {
        let f = fixture();
        f.queue_reaction("u1", t0(), ChronoDuration::minutes(1)).await;
        f.repo.record_engagement("u1", t0()).await.unwrap();
        f.clock.advance(ChronoDuration::minutes(61));

        let engaged = f.scheduler.core.engaged_users(f.clock.now()).await.unwrap();
        assert!(engaged.is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_purges_queue_counters_and_locks() {
        let f = fixture();
        f.queue_reaction("u1", t0(), ChronoDuration::minutes(5)).await;
        let stale_date = t0().date_naive() - ChronoDuration::days(10);
        f.repo
            .get_and_increment_daily_counter("u1", stale_date, t0() - ChronoDuration::days(10))
            .await
            .unwrap();
        f.repo
            .get_and_increment_daily_counter("u1", t0().date_naive(), t0())
            .await
            .unwrap();
        drop(f.guard.lock_user("u1").await.unwrap());

        f.clock.advance(ChronoDuration::hours(13));
        let dropped = f.scheduler.maintain_now().await.unwrap();

        assert_eq!(dropped, 1);
        assert!(f.queue.is_empty());
        assert_eq!(f.scheduler.status().dropped_total, 1);
        let stale = f.repo.get_daily_counter("u1", stale_date).await.unwrap();
        assert_eq!(stale.emission_count, 0);
        let today = f.repo.get_daily_counter("u1", t0().date_naive()).await.unwrap();
        assert_eq!(today.emission_count, 1);
        assert_eq!(f.guard.prune_idle_locks(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_recorded_in_status() {
        let f = fixture();
        f.queue_reaction("u1", t0(), ChronoDuration::minutes(5)).await;
        f.queue_reaction("u1", t0(), ChronoDuration::minutes(9)).await;
        assert!(f.scheduler.status().last_snapshot.is_none());

        let snapshot = f.scheduler.snapshot_now().await.unwrap();
        assert_eq!(snapshot.taken_at, t0());
        assert_eq!(snapshot.active_users, 1);
        assert_eq!(snapshot.pending_candidates, 2);
        assert_eq!(snapshot.emitted_total, 0);
        assert_eq!(f.scheduler.status().last_snapshot, Some(snapshot));
    }

    /// Blocks inside `generate` until released.
    struct HeldGenerator {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ResponseGenerator for HeldGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> KindredResult<String> {
            self.started.notify_one();
            self.release.notified().await;
            Ok("held reply".to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_in_flight_tick() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let generator = HeldGenerator {
            started: started.clone(),
            release: release.clone(),
        };
        let mut config = EngineConfig::default();
        config.max_concurrent_users = 1;
        let f = fixture_with(config, Arc::new(generator));
        f.queue_reaction("u1", t0(), ChronoDuration::minutes(1)).await;
        f.queue_reaction("u2", t0(), ChronoDuration::minutes(1)).await;
        f.clock.advance(ChronoDuration::minutes(2));

        f.scheduler.start().await.unwrap();
        let tick = {
            let scheduler = f.scheduler.clone();
            tokio::spawn(async move { scheduler.trigger_cycle_now().await })
        };
        started.notified().await;

        let stopping = {
            let scheduler = f.scheduler.clone();
            tokio::spawn(async move { scheduler.stop().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());
        assert_eq!(f.scheduler.state(), SchedulerState::Stopping);

        release.notify_one();
        stopping.await.unwrap().unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::Stopped);

        // The candidate in progress finished; the next user was never started
        let report = tick.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.emitted, 1);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.repo.emission_count(), 1);
    }
}
