//! Per-tier probability and cap policies.

use serde::{Deserialize, Serialize};

use crate::error::{KindredError, KindredResult};
use crate::types::{InteractionLevel, Tier};

/// Everything the engine and guard need to know about one
/// `(tier, interaction_level)` cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tier: Tier,
    pub interaction_level: InteractionLevel,
    /// Independent per-persona chance of a reaction.
    pub reaction_probability: f64,
    /// When set, only this many randomly chosen personas may react.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_persona_limit: Option<usize>,
    /// Reply chance by daily sequence number: index 0 is the first entry.
    /// Entries past the end use the last value.
    pub reply_decay: Vec<f64>,
    /// Maximum emissions per local day.
    pub daily_cap: u32,
}

impl TierPolicy {
    pub fn new(
        tier: Tier,
        interaction_level: InteractionLevel,
        reaction_probability: f64,
        reply_decay: Vec<f64>,
        daily_cap: u32,
    ) -> Self {
        Self {
            tier,
            interaction_level,
            reaction_probability,
            reaction_persona_limit: None,
            reply_decay,
            daily_cap,
        }
    }

    pub fn with_reaction_limit(mut self, limit: usize) -> Self {
        self.reaction_persona_limit = Some(limit);
        self
    }

    /// Reply probability for the `sequence`-th entry of the day (1-based).
    pub fn reply_probability(&self, sequence: u32) -> f64 {
        if self.reply_decay.is_empty() {
            return 0.0;
        }
        let index = (sequence.max(1) as usize - 1).min(self.reply_decay.len() - 1);
        self.reply_decay[index]
    }

    fn validate(&self) -> KindredResult<()> {
        let cell = format!("{}/{}", self.tier, self.interaction_level);
        if !(0.0..=1.0).contains(&self.reaction_probability) {
            return Err(KindredError::configuration(format!(
                "reaction_probability for {} must be within [0, 1], got {}",
                cell, self.reaction_probability
            )));
        }
        if self.reply_decay.is_empty() {
            return Err(KindredError::configuration(format!(
                "reply_decay for {} must not be empty",
                cell
            )));
        }
        if let Some(p) = self.reply_decay.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(KindredError::configuration(format!(
                "reply_decay for {} contains out-of-range probability {}",
                cell, p
            )));
        }
        if self.daily_cap == 0 {
            return Err(KindredError::configuration(format!(
                "daily_cap for {} must be at least 1",
                cell
            )));
        }
        if self.reaction_persona_limit == Some(0) {
            return Err(KindredError::configuration(format!(
                "reaction_persona_limit for {} must be at least 1 when set",
                cell
            )));
        }
        Ok(())
    }
}

/// Lookup table of [`TierPolicy`] cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable {
    rules: Vec<TierPolicy>,
}

impl PolicyTable {
    pub fn new(rules: Vec<TierPolicy>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TierPolicy] {
        &self.rules
    }

    /// Policy for a cell, if the table defines it.
    pub fn get(&self, tier: Tier, level: InteractionLevel) -> Option<&TierPolicy> {
        self.rules
            .iter()
            .find(|r| r.tier == tier && r.interaction_level == level)
    }

    /// Policy for a cell, or a configuration error naming the missing cell.
    pub fn require(&self, tier: Tier, level: InteractionLevel) -> KindredResult<&TierPolicy> {
        self.get(tier, level).ok_or_else(|| {
            KindredError::configuration(format!("No policy configured for {}/{}", tier, level))
        })
    }

    /// Daily cap for a cell. Undefined cells get the smallest cap in the table.
    pub fn daily_cap(&self, tier: Tier, level: InteractionLevel) -> u32 {
        self.get(tier, level)
            .map(|r| r.daily_cap)
            .unwrap_or_else(|| self.fallback_cap())
    }

    /// The most conservative cap defined anywhere in the table.
    pub fn fallback_cap(&self) -> u32 {
        self.rules.iter().map(|r| r.daily_cap).min().unwrap_or(1)
    }

    pub fn validate(&self) -> KindredResult<()> {
        if self.rules.is_empty() {
            return Err(KindredError::configuration("Policy table has no rules"));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate()?;
            if self.rules[..i]
                .iter()
                .any(|r| r.tier == rule.tier && r.interaction_level == rule.interaction_level)
            {
                return Err(KindredError::configuration(format!(
                    "Duplicate policy for {}/{}",
                    rule.tier, rule.interaction_level
                )));
            }
        }
        Ok(())
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        use InteractionLevel::*;
        use Tier::*;

        Self::new(vec![
            // Reaction-only mode
            TierPolicy::new(Free, Low, 0.5, vec![0.0], 2),
            TierPolicy::new(Free, Normal, 0.7, vec![1.0, 0.5, 0.3], 3),
            // Free users cannot raise engagement above Normal
            TierPolicy::new(Free, High, 0.7, vec![1.0, 0.5, 0.3], 3),
            TierPolicy::new(Premium, Low, 0.5, vec![0.3], 2).with_reaction_limit(2),
            TierPolicy::new(Premium, Normal, 0.7, vec![1.0, 0.7, 0.5], 5),
            TierPolicy::new(Premium, High, 0.9, vec![0.7], 10),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_complete() {
        let table = PolicyTable::default();
        table.validate().unwrap();
        for tier in [Tier::Free, Tier::Premium] {
            for level in [InteractionLevel::Low, InteractionLevel::Normal, InteractionLevel::High] {
                assert!(table.get(tier, level).is_some(), "missing {}/{}", tier, level);
            }
        }
    }

    #[test]
    fn test_reply_decay_uses_nearest_bound() {
        let table = PolicyTable::default();
        let free_normal = table.get(Tier::Free, InteractionLevel::Normal).unwrap();
        assert_eq!(free_normal.reply_probability(1), 1.0);
        assert_eq!(free_normal.reply_probability(2), 0.5);
        assert_eq!(free_normal.reply_probability(3), 0.3);
        assert_eq!(free_normal.reply_probability(9), 0.3);
        // Sequence numbers are 1-based; 0 is treated as the first entry
        assert_eq!(free_normal.reply_probability(0), 1.0);

        let premium_high = table.get(Tier::Premium, InteractionLevel::High).unwrap();
        assert_eq!(premium_high.reply_probability(1), 0.7);
        assert_eq!(premium_high.reply_probability(4), 0.7);
    }

    #[test]
    fn test_missing_cell_uses_smallest_cap() {
        let table = PolicyTable::new(vec![
            TierPolicy::new(Tier::Premium, InteractionLevel::High, 0.9, vec![0.7], 10),
            TierPolicy::new(Tier::Free, InteractionLevel::Low, 0.5, vec![0.0], 2),
        ]);
        assert_eq!(table.daily_cap(Tier::Premium, InteractionLevel::High), 10);
        assert_eq!(table.daily_cap(Tier::Premium, InteractionLevel::Normal), 2);
        assert!(table.require(Tier::Free, InteractionLevel::Normal).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_cells() {
        let bad_probability = PolicyTable::new(vec![TierPolicy::new(
            Tier::Free,
            InteractionLevel::Low,
            1.5,
            vec![0.0],
            2,
        )]);
        assert!(bad_probability.validate().is_err());

        let empty_decay = PolicyTable::new(vec![TierPolicy::new(
            Tier::Free,
            InteractionLevel::Low,
            0.5,
            vec![],
            2,
        )]);
        assert!(empty_decay.validate().is_err());

        let zero_cap = PolicyTable::new(vec![TierPolicy::new(
            Tier::Free,
            InteractionLevel::Low,
            0.5,
            vec![0.0],
            0,
        )]);
        assert!(zero_cap.validate().is_err());

        let duplicate = PolicyTable::new(vec![
            TierPolicy::new(Tier::Free, InteractionLevel::Low, 0.5, vec![0.0], 2),
            TierPolicy::new(Tier::Free, InteractionLevel::Low, 0.4, vec![0.0], 2),
        ]);
        assert!(duplicate.validate().is_err());

        assert!(PolicyTable::new(vec![]).validate().is_err());
    }
}
