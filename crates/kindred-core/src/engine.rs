//! Probability engine.
//!
//! Decides, for one journal entry, which personas react, whether one of
//! them replies, and how long each response waits before it may be sent.
//! Randomness is injected so that a seeded RNG gives reproducible draws.

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{DelayConfig, EngineConfig, PolicyTable, TierPolicy};
use crate::error::{KindredError, KindredResult};
use crate::types::{JournalEntry, Persona, ResponseCandidate, ResponseKind, UserTierProfile};

/// Pure decision function from (profile, entry) to response candidates.
#[derive(Debug, Clone)]
pub struct ProbabilityEngine {
    personas: Vec<Persona>,
    policies: PolicyTable,
    delays: DelayConfig,
}

impl ProbabilityEngine {
    pub fn new(personas: Vec<Persona>, policies: PolicyTable, delays: DelayConfig) -> Self {
        Self {
            personas,
            policies,
            delays,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.personas.clone(),
            config.policies.clone(),
            config.delays.clone(),
        )
    }

    /// Compute the candidates for one entry.
    ///
    /// Returns at most one candidate per `(persona, kind)` pair and at most
    /// one Reply. Inactive profiles get nothing. `engaged` selects the short
    /// delay range.
    pub fn compute_candidates<R: Rng + ?Sized>(
        &self,
        profile: &UserTierProfile,
        entry: &JournalEntry,
        engaged: bool,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> KindredResult<Vec<ResponseCandidate>> {
        if !profile.is_active {
            tracing::debug!(user_id = %profile.user_id, "Skipping inactive user");
            return Ok(Vec::new());
        }
        if entry.daily_sequence_number == 0 {
            return Err(KindredError::validation(format!(
                "Entry '{}' has daily sequence number 0",
                entry.entry_id
            )));
        }

        let policy = self
            .policies
            .require(profile.tier, profile.interaction_level)?;
        let eligible: Vec<&Persona> = self
            .personas
            .iter()
            .filter(|p| p.available_to(profile.tier))
            .collect();

        let mut candidates = Vec::new();

        for persona in self.reacting_pool(&eligible, policy, rng) {
            if rng.gen::<f64>() < policy.reaction_probability {
                let delay = self.draw_delay(engaged, rng)?;
                candidates.push(candidate(entry, persona, ResponseKind::Reaction, now, delay));
            }
        }

        let reply_probability = policy.reply_probability(entry.daily_sequence_number);
        if rng.gen::<f64>() < reply_probability {
            if let Some(persona) = eligible.choose(rng) {
                let delay = self.draw_delay(engaged, rng)?;
                candidates.push(candidate(entry, persona, ResponseKind::Reply, now, delay));
            }
        }

        tracing::debug!(
            user_id = %profile.user_id,
            entry_id = %entry.entry_id,
            sequence = entry.daily_sequence_number,
            reply_probability,
            count = candidates.len(),
            "Computed response candidates"
        );

        Ok(candidates)
    }

    /// Personas that get a reaction draw, in roster order.
    fn reacting_pool<'a, R: Rng + ?Sized>(
        &self,
        eligible: &[&'a Persona],
        policy: &TierPolicy,
        rng: &mut R,
    ) -> Vec<&'a Persona> {
        match policy.reaction_persona_limit {
            Some(limit) if limit < eligible.len() => {
                let chosen: Vec<&Persona> = eligible.choose_multiple(rng, limit).copied().collect();
                eligible
                    .iter()
                    .copied()
                    .filter(|p| chosen.iter().any(|c| c.id == p.id))
                    .collect()
            }
            _ => eligible.to_vec(),
        }
    }

    /// Uniform delay from the default or engaged range, inclusive.
    pub fn draw_delay<R: Rng + ?Sized>(
        &self,
        engaged: bool,
        rng: &mut R,
    ) -> KindredResult<Duration> {
        let (min, max) = if engaged {
            (self.delays.engaged_min_secs, self.delays.engaged_max_secs)
        } else {
            (self.delays.default_min_secs, self.delays.default_max_secs)
        };
        let secs = if min >= max { min } else { rng.gen_range(min..=max) };
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                KindredError::configuration(format!("Delay of {} seconds is out of range", secs))
            })
    }
}

fn candidate(
    entry: &JournalEntry,
    persona: &Persona,
    kind: ResponseKind,
    now: DateTime<Utc>,
    delay: Duration,
) -> ResponseCandidate {
    ResponseCandidate::new(
        entry.entry_id.clone(),
        entry.user_id.clone(),
        persona.id.clone(),
        kind,
        now,
        delay,
    )
}
