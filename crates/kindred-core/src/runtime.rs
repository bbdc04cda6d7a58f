//! Runtime facade.
//!
//! Wires repository, generator, engine, guard, queue, coordinator and
//! scheduler together behind the operations the API layer calls.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, DayBoundary, SystemClock};
use crate::config::EngineConfig;
use crate::coordinator::EmissionCoordinator;
use crate::engine::ProbabilityEngine;
use crate::error::{KindredError, KindredResult};
use crate::events::{EngineEvent, EventBus, EventSubscriber};
use crate::guard::BombardmentGuard;
use crate::queue::CandidateQueue;
use crate::scheduler::{HealthReport, Scheduler, SchedulerStatus, TickReport};
use crate::store::{InMemoryActivityRepository, SqliteActivityRepository};
use crate::traits::{ActivityRepository, ResponseGenerator};
use crate::types::{EmissionRecord, JournalEntry, NewEntry, ResponseCandidate, UserSettings};

/// Process-level settings for building a [`ResponseRuntime`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Engine configuration.
    pub engine: EngineConfig,
    /// SQLite database path. `None` or `":memory:"` keeps everything in memory.
    pub db_path: Option<String>,
    /// Fixed RNG seed for reproducible draws.
    pub rng_seed: Option<u64>,
}

impl RuntimeConfig {
    pub fn with_db_path(mut self, path: impl Into<String>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Create config from environment variables.
    ///
    /// Reads:
    /// - `KINDRED_CONFIG`: engine config file (TOML, JSON or YAML)
    /// - `KINDRED_DB_PATH`: SQLite path, `:memory:` for volatile storage
    /// - `KINDRED_RNG_SEED`
    ///
    /// plus every engine override read by [`EngineConfig::apply_env`].
    pub fn from_env() -> KindredResult<Self> {
        let engine = match std::env::var("KINDRED_CONFIG") {
            Ok(path) => EngineConfig::from_file(&path)?.apply_env(),
            Err(_) => EngineConfig::from_env(),
        };
        engine.validate()?;

        let db_path = std::env::var("KINDRED_DB_PATH")
            .ok()
            .or_else(|| {
                SqliteActivityRepository::default_path()
                    .to_str()
                    .map(str::to_string)
            });

        let rng_seed = std::env::var("KINDRED_RNG_SEED")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            engine,
            db_path,
            rng_seed,
        })
    }

    /// Open the repository this config points at.
    pub fn open_repository(&self) -> KindredResult<Arc<dyn ActivityRepository>> {
        match self.db_path.as_deref() {
            None | Some(":memory:") => {
                debug!("Using in-memory activity repository");
                Ok(Arc::new(InMemoryActivityRepository::new()))
            }
            Some(path) => {
                debug!(path, "Using SQLite activity repository");
                Ok(Arc::new(SqliteActivityRepository::new(path)?))
            }
        }
    }
}

/// What happened to a submitted entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeReport {
    pub entry: JournalEntry,
    /// Candidates queued for later emission.
    pub candidates: Vec<ResponseCandidate>,
    /// Whether the short delay range was used.
    pub engaged: bool,
}

/// The engine as one object.
pub struct ResponseRuntime {
    config: EngineConfig,
    repository: Arc<dyn ActivityRepository>,
    clock: Arc<dyn Clock>,
    day: DayBoundary,
    engine: ProbabilityEngine,
    guard: Arc<BombardmentGuard>,
    queue: Arc<CandidateQueue>,
    scheduler: Scheduler,
    events: EventBus,
    rng: Mutex<StdRng>,
}

impl ResponseRuntime {
    /// Build a runtime on the system clock with an entropy-seeded RNG.
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn ActivityRepository>,
        generator: Arc<dyn ResponseGenerator>,
    ) -> KindredResult<Self> {
        Self::with_parts(config, repository, generator, Arc::new(SystemClock), None)
    }

    /// Build a runtime from process settings.
    pub fn from_config(
        runtime: RuntimeConfig,
        generator: Arc<dyn ResponseGenerator>,
    ) -> KindredResult<Self> {
        let repository = runtime.open_repository()?;
        Self::with_parts(
            runtime.engine,
            repository,
            generator,
            Arc::new(SystemClock),
            runtime.rng_seed,
        )
    }

    /// Build a runtime with an explicit clock and optional RNG seed.
    pub fn with_parts(
        config: EngineConfig,
        repository: Arc<dyn ActivityRepository>,
        generator: Arc<dyn ResponseGenerator>,
        clock: Arc<dyn Clock>,
        rng_seed: Option<u64>,
    ) -> KindredResult<Self> {
        config.validate()?;

        let events = EventBus::new();
        let guard = Arc::new(BombardmentGuard::from_config(repository.clone(), &config)?);
        let coordinator = Arc::new(EmissionCoordinator::new(
            repository.clone(),
            generator,
            guard.clone(),
            &config,
            events.clone(),
        )?);
        let queue = Arc::new(CandidateQueue::new());
        let scheduler = Scheduler::new(
            repository.clone(),
            coordinator,
            queue.clone(),
            clock.clone(),
            config.clone(),
            events.clone(),
        );
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        debug!(
            personas = config.personas.len(),
            policies = config.policies.rules().len(),
            seeded = rng_seed.is_some(),
            "Created response runtime"
        );

        Ok(Self {
            day: config.day_boundary(),
            engine: ProbabilityEngine::from_config(&config),
            config,
            repository,
            clock,
            guard,
            queue,
            scheduler,
            events,
            rng: Mutex::new(rng),
        })
    }

    /// Record a journal entry and queue whatever responses it earns.
    pub async fn submit_entry(&self, new_entry: NewEntry) -> KindredResult<IntakeReport> {
        if new_entry.user_id.trim().is_empty() {
            return Err(KindredError::missing_field("user_id"));
        }
        if new_entry.content.trim().is_empty() {
            return Err(KindredError::missing_field("content"));
        }

        let now = self.clock.now();
        let created_at = new_entry.created_at.unwrap_or(now);
        let entry_date = self.day.date_of(created_at);

        // Sequence numbers are assigned under the user's lock
        let entry = {
            let _section = self.guard.lock_user(&new_entry.user_id).await?;
            let sequence = self
                .repository
                .get_daily_entry_sequence(&new_entry.user_id, entry_date)
                .await?
                + 1;
            let entry = JournalEntry {
                entry_id: new_entry
                    .entry_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                user_id: new_entry.user_id.clone(),
                created_at,
                entry_date,
                daily_sequence_number: sequence,
            };
            self.repository.record_entry(&entry, &new_entry.content).await?;
            entry
        };

        let profile = self
            .repository
            .get_user_profile(&entry.user_id, now - self.config.activity_window()?)
            .await?
            .ok_or_else(|| KindredError::user_not_found(&entry.user_id))?;
        let engaged = self.is_engaged(&entry.user_id, now).await?;

        let candidates = {
            // RNG state is intact after a poisoning panic
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.engine
                .compute_candidates(&profile, &entry, engaged, now, &mut *rng)?
        };

        for candidate in &candidates {
            debug!(
                user_id = %candidate.user_id,
                entry_id = %candidate.entry_id,
                persona_id = %candidate.persona_id,
                kind = %candidate.response_kind,
                not_before = %candidate.scheduled_not_before,
                "Candidate queued"
            );
            self.events.emit(EngineEvent::CandidateQueued {
                candidate_id: candidate.candidate_id,
                user_id: candidate.user_id.clone(),
                entry_id: candidate.entry_id.clone(),
                persona_id: candidate.persona_id.clone(),
                response_kind: candidate.response_kind,
                scheduled_not_before: candidate.scheduled_not_before,
            });
        }
        self.queue.extend(candidates.iter().cloned())?;

        info!(
            user_id = %entry.user_id,
            entry_id = %entry.entry_id,
            sequence = entry.daily_sequence_number,
            candidates = candidates.len(),
            engaged,
            "Entry accepted"
        );

        Ok(IntakeReport {
            entry,
            candidates,
            engaged,
        })
    }

    /// Whether the user engaged with an AI response inside the window.
    pub async fn is_engaged(&self, user_id: &str, now: DateTime<Utc>) -> KindredResult<bool> {
        let since = now - self.config.engagement_window()?;
        Ok(self
            .repository
            .last_engagement_at(user_id)
            .await?
            .is_some_and(|at| at >= since))
    }

    /// Note that the user reacted to or replied to an AI response.
    pub async fn record_engagement(
        &self,
        user_id: &str,
        at: Option<DateTime<Utc>>,
    ) -> KindredResult<()> {
        if user_id.trim().is_empty() {
            return Err(KindredError::missing_field("user_id"));
        }
        let at = at.unwrap_or_else(|| self.clock.now());
        self.repository.record_engagement(user_id, at).await?;
        debug!(user_id, %at, "Engagement recorded");
        Ok(())
    }

    pub async fn save_user_settings(&self, settings: &UserSettings) -> KindredResult<()> {
        if settings.user_id.trim().is_empty() {
            return Err(KindredError::missing_field("user_id"));
        }
        self.repository.save_user_settings(settings).await
    }

    pub async fn list_emissions(&self, user_id: &str) -> KindredResult<Vec<EmissionRecord>> {
        self.repository.list_emissions(user_id).await
    }

    pub async fn start(&self) -> KindredResult<()> {
        self.scheduler.start().await
    }

    pub async fn stop(&self) -> KindredResult<()> {
        self.scheduler.stop().await
    }

    pub fn status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn health(&self) -> HealthReport {
        self.scheduler.health()
    }

    pub async fn trigger_cycle_now(&self) -> KindredResult<TickReport> {
        self.scheduler.trigger_cycle_now().await
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerStatus> {
        self.scheduler.watch_state()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn queue(&self) -> &Arc<CandidateQueue> {
        &self.queue
    }

    pub fn repository(&self) -> Arc<dyn ActivityRepository> {
        self.repository.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
