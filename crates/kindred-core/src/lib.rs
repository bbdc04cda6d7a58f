//! kindred-core - Core library for kindred.
//!
//! Decides which AI personas answer a journal entry, when they may speak,
//! and drives the background ticks that turn queued candidates into
//! persisted responses without flooding any one user.
//!
//! # Example
//!
//! ```ignore
//! use kindred_core::{EngineConfig, NewEntry, ResponseRuntime};
//!
//! let runtime = ResponseRuntime::new(EngineConfig::default(), repository, generator)?;
//! runtime.start().await?;
//!
//! // Queue response opportunities for a new entry
//! let report = runtime.submit_entry(NewEntry::new("user1", "Long day at work")).await?;
//!
//! // Emit whatever is due right away
//! let tick = runtime.trigger_cycle_now().await?;
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, DayBoundary, ManualClock, SystemClock};
pub use config::{DelayConfig, EngineConfig, PolicyTable, ScheduleConfig, TierPolicy};
pub use coordinator::{EmissionCoordinator, EmitOutcome};
pub use engine::ProbabilityEngine;
pub use error::{ErrorCode, KindredError, KindredResult};
pub use events::{DropReason, EngineEvent, EventBus, EventSubscriber};
pub use guard::{BombardmentGuard, DenyReason, GuardDecision};
pub use queue::CandidateQueue;
pub use runtime::{IntakeReport, ResponseRuntime, RuntimeConfig};
pub use scheduler::{
    AnalyticsSnapshot, HealthReport, Scheduler, SchedulerState, SchedulerStatus, TickKind,
    TickReport,
};
pub use store::{InMemoryActivityRepository, SqliteActivityRepository};
pub use traits::{ActivityRepository, GenerationRequest, ResponseGenerator};
pub use types::{
    default_personas, DailyCounters, EmissionRecord, InteractionLevel, JournalEntry, NewEntry,
    Persona, PersonaId, ResponseCandidate, ResponseKind, Tier, UserSettings, UserTierProfile,
};
