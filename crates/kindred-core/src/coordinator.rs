//! Emission coordinator.
//!
//! Turns one due candidate into a persisted emission: guard check, text
//! generation, persistence and counter update, all inside the user's
//! critical section.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{KindredError, KindredResult};
use crate::events::{DropReason, EngineEvent, EventBus};
use crate::guard::{BombardmentGuard, DenyReason, GuardDecision};
use crate::traits::{ActivityRepository, GenerationRequest, ResponseGenerator};
use crate::types::{EmissionRecord, Persona, ResponseCandidate, ResponseKind, UserTierProfile};

/// Result of one emission attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    /// Sent and recorded. The candidate is now approved.
    Emitted(EmissionRecord),
    /// The guard refused; try again on a later tick.
    Deferred(DenyReason),
    /// Never to be sent.
    Discarded(DropReason),
}

pub struct EmissionCoordinator {
    repository: Arc<dyn ActivityRepository>,
    generator: Arc<dyn ResponseGenerator>,
    guard: Arc<BombardmentGuard>,
    personas: Vec<Persona>,
    horizon: Duration,
    generation_timeout: std::time::Duration,
    events: EventBus,
}

impl EmissionCoordinator {
    pub fn new(
        repository: Arc<dyn ActivityRepository>,
        generator: Arc<dyn ResponseGenerator>,
        guard: Arc<BombardmentGuard>,
        config: &EngineConfig,
        events: EventBus,
    ) -> KindredResult<Self> {
        Ok(Self {
            repository,
            generator,
            guard,
            personas: config.personas.clone(),
            horizon: config.candidate_horizon()?,
            generation_timeout: config.generation_timeout(),
            events,
        })
    }

    pub fn with_generation_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn guard(&self) -> &Arc<BombardmentGuard> {
        &self.guard
    }

    /// Attempt to emit `candidate` for the user described by `profile`.
    ///
    /// `Err` means nothing was persisted or counted and the candidate should
    /// stay queued.
    pub async fn emit(
        &self,
        candidate: &mut ResponseCandidate,
        profile: &UserTierProfile,
        now: DateTime<Utc>,
    ) -> KindredResult<EmitOutcome> {
        let _section = self.guard.lock_user(&candidate.user_id).await?;

        if candidate.approved {
            return Err(KindredError::invalid_state("emit", "candidate already approved"));
        }
        if candidate.is_expired(now, self.horizon) {
            return Ok(self.discard(candidate, DropReason::Expired, now));
        }

        if candidate.response_kind == ResponseKind::Reply {
            let existing = self.repository.get_existing_reply(&candidate.entry_id).await?;
            if let Some(existing) = existing {
                tracing::error!(
                    entry_id = %candidate.entry_id,
                    candidate_id = %candidate.candidate_id,
                    existing = %existing.emission_id,
                    "Entry already has a reply, discarding candidate"
                );
                return Ok(self.reply_anomaly(candidate, now));
            }
        }

        if let GuardDecision::Denied(reason) = self.guard.check(profile, now).await? {
            tracing::debug!(
                user_id = %candidate.user_id,
                candidate_id = %candidate.candidate_id,
                ?reason,
                "Emission deferred by guard"
            );
            self.events.emit(EngineEvent::EmissionDeferred {
                candidate_id: candidate.candidate_id,
                user_id: candidate.user_id.clone(),
                timestamp: now,
            });
            return Ok(EmitOutcome::Deferred(reason));
        }

        let Some(persona) = self.personas.iter().find(|p| p.id == candidate.persona_id) else {
            tracing::error!(
                persona_id = %candidate.persona_id,
                candidate_id = %candidate.candidate_id,
                "Unknown persona"
            );
            return Ok(self.discard(candidate, DropReason::Configuration, now));
        };

        let entry_content = self.repository.get_entry_content(&candidate.entry_id).await?;
        let Some(entry_content) = entry_content else {
            tracing::error!(
                entry_id = %candidate.entry_id,
                candidate_id = %candidate.candidate_id,
                "Entry missing from repository"
            );
            return Ok(self.discard(candidate, DropReason::Configuration, now));
        };

        let request = GenerationRequest {
            user_id: candidate.user_id.clone(),
            entry_id: candidate.entry_id.clone(),
            entry_content,
            persona: persona.clone(),
            response_kind: candidate.response_kind,
        };
        let content = self.generate(&request).await?;

        let record = EmissionRecord::for_candidate(candidate, content, now);
        match self.guard.commit_emission(&record).await {
            Ok(_) => {}
            Err(e) if e.is_duplicate_reply() => {
                tracing::error!(
                    entry_id = %candidate.entry_id,
                    candidate_id = %candidate.candidate_id,
                    "Second reply rejected at persistence"
                );
                return Ok(self.reply_anomaly(candidate, now));
            }
            Err(e) => return Err(e),
        }
        candidate.approved = true;

        tracing::info!(
            user_id = %record.user_id,
            entry_id = %record.entry_id,
            persona_id = %record.persona_id,
            kind = %record.response_kind,
            "Response emitted"
        );
        self.events.emit(EngineEvent::ResponseEmitted {
            emission_id: record.emission_id,
            user_id: record.user_id.clone(),
            entry_id: record.entry_id.clone(),
            persona_id: record.persona_id.clone(),
            response_kind: record.response_kind,
            timestamp: now,
        });

        Ok(EmitOutcome::Emitted(record))
    }

    async fn generate(&self, request: &GenerationRequest) -> KindredResult<String> {
        let generation = self.generator.generate(request);
        let content = tokio::time::timeout(self.generation_timeout, generation)
            .await
            .map_err(|_| KindredError::timeout("generate", self.generation_timeout))??;

        if content.trim().is_empty() {
            return Err(KindredError::generation("Generator returned empty content"));
        }
        Ok(content)
    }

    fn reply_anomaly(&self, candidate: &ResponseCandidate, now: DateTime<Utc>) -> EmitOutcome {
        self.events.emit(EngineEvent::ReplyAnomaly {
            candidate_id: candidate.candidate_id,
            user_id: candidate.user_id.clone(),
            entry_id: candidate.entry_id.clone(),
            timestamp: now,
        });
        self.discard(candidate, DropReason::DuplicateReply, now)
    }

    fn discard(
        &self,
        candidate: &ResponseCandidate,
        reason: DropReason,
        now: DateTime<Utc>,
    ) -> EmitOutcome {
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
        EmitOutcome::Discarded(reason)
    }
}
