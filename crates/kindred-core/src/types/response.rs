//! Candidates, emission records and daily counters.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::persona::PersonaId;

/// What kind of response a persona sends.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ResponseKind {
    /// Lightweight acknowledgement; several personas may react to one entry.
    Reaction,
    /// Full textual response; at most one per entry.
    Reply,
}

/// A not-yet-emitted decision to respond to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCandidate {
    pub candidate_id: Uuid,
    pub entry_id: String,
    pub user_id: String,
    pub persona_id: PersonaId,
    pub response_kind: ResponseKind,
    pub created_at: DateTime<Utc>,
    /// Earliest time this candidate may be emitted.
    pub scheduled_not_before: DateTime<Utc>,
    /// Set once the candidate has been emitted. Terminal.
    #[serde(default)]
    pub approved: bool,
    /// Failed emission attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl ResponseCandidate {
    pub fn new(
        entry_id: impl Into<String>,
        user_id: impl Into<String>,
        persona_id: PersonaId,
        response_kind: ResponseKind,
        created_at: DateTime<Utc>,
        delay: Duration,
    ) -> Self {
        Self {
            candidate_id: Uuid::new_v4(),
            entry_id: entry_id.into(),
            user_id: user_id.into(),
            persona_id,
            response_kind,
            created_at,
            scheduled_not_before: created_at + delay,
            approved: false,
            attempts: 0,
        }
    }

    /// Whether the delay has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.scheduled_not_before
    }

    /// Instant after which the candidate must never be emitted.
    pub fn expires_at(&self, horizon: Duration) -> DateTime<Utc> {
        self.scheduled_not_before + horizon
    }

    pub fn is_expired(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        !self.approved && now >= self.expires_at(horizon)
    }
}

/// Permanent log entry of a response that was actually sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub emission_id: Uuid,
    pub user_id: String,
    pub persona_id: PersonaId,
    pub entry_id: String,
    pub response_kind: ResponseKind,
    pub content: String,
    pub emitted_at: DateTime<Utc>,
}

impl EmissionRecord {
    /// Record the emission of `candidate` with the generated `content`.
    pub fn for_candidate(
        candidate: &ResponseCandidate,
        content: impl Into<String>,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            emission_id: Uuid::new_v4(),
            user_id: candidate.user_id.clone(),
            persona_id: candidate.persona_id.clone(),
            entry_id: candidate.entry_id.clone(),
            response_kind: candidate.response_kind,
            content: content.into(),
            emitted_at,
        }
    }
}

/// Per-user, per-local-day emission bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounters {
    pub user_id: String,
    pub date: NaiveDate,
    pub emission_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_emission_at: Option<DateTime<Utc>>,
}

impl DailyCounters {
    /// A fresh counter for a day with no emissions yet.
    pub fn empty(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            emission_count: 0,
            last_emission_at: None,
        }
    }
}
