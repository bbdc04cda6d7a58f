//! Events published while candidates move through the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::scheduler::SchedulerState;
use crate::types::{PersonaId, ResponseKind};

/// Why a candidate was discarded without emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    /// The candidate outlived its horizon.
    Expired,
    /// A reply for the same entry was already emitted.
    DuplicateReply,
    /// The user no longer exists or is no longer active.
    UnknownUser,
    /// Persona, policy or entry lookup failed.
    Configuration,
}

/// Observable engine events.
///
/// Emitted to the event bus; subscribers that lag miss events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    CandidateQueued {
        candidate_id: Uuid,
        user_id: String,
        entry_id: String,
        persona_id: PersonaId,
        response_kind: ResponseKind,
        scheduled_not_before: DateTime<Utc>,
    },
    ResponseEmitted {
        emission_id: Uuid,
        user_id: String,
        entry_id: String,
        persona_id: PersonaId,
        response_kind: ResponseKind,
        timestamp: DateTime<Utc>,
    },
    /// The bombardment guard asked the candidate to wait.
    EmissionDeferred {
        candidate_id: Uuid,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    CandidateDropped {
        candidate_id: Uuid,
        user_id: String,
        entry_id: String,
        reason: DropReason,
        timestamp: DateTime<Utc>,
    },
    /// A transient failure; the candidate stays queued.
    EmissionFailed {
        candidate_id: Uuid,
        user_id: String,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// A second reply for one entry was caught at persistence time.
    ReplyAnomaly {
        candidate_id: Uuid,
        user_id: String,
        entry_id: String,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        from: SchedulerState,
        to: SchedulerState,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event type as a string for filtering.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CandidateQueued { .. } => "candidate.queued",
            Self::ResponseEmitted { .. } => "response.emitted",
            Self::EmissionDeferred { .. } => "emission.deferred",
            Self::CandidateDropped { .. } => "candidate.dropped",
            Self::EmissionFailed { .. } => "emission.failed",
            Self::ReplyAnomaly { .. } => "reply.anomaly",
            Self::StateChanged { .. } => "scheduler.state_changed",
        }
    }

    /// User the event relates to, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::CandidateQueued { user_id, .. }
            | Self::ResponseEmitted { user_id, .. }
            | Self::EmissionDeferred { user_id, .. }
            | Self::CandidateDropped { user_id, .. }
            | Self::EmissionFailed { user_id, .. }
            | Self::ReplyAnomaly { user_id, .. } => Some(user_id),
            Self::StateChanged { .. } => None,
        }
    }
}
