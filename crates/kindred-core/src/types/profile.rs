//! User tier and interaction settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Subscription tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

/// User-chosen interaction level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InteractionLevel {
    Low,
    #[default]
    Normal,
    High,
}

/// Account settings as written by the settings collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub interaction_level: InteractionLevel,
}

impl UserSettings {
    pub fn new(
        user_id: impl Into<String>,
        tier: Tier,
        interaction_level: InteractionLevel,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tier,
            interaction_level,
        }
    }
}

/// Read-only snapshot of a user's tier configuration, fetched per cycle.
///
/// `is_active` is derived by the repository: the user wrote an entry or
/// engaged with an AI response inside the activity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTierProfile {
    pub user_id: String,
    pub tier: Tier,
    pub interaction_level: InteractionLevel,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

impl UserTierProfile {
    /// Build a profile, deriving `is_active` from the last activity time.
    pub fn from_settings(
        settings: &UserSettings,
        last_active_at: Option<DateTime<Utc>>,
        active_since: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: settings.user_id.clone(),
            tier: settings.tier,
            interaction_level: settings.interaction_level,
            is_active: last_active_at.is_some_and(|at| at >= active_since),
            last_active_at,
        }
    }

    /// Build an active profile directly. Mostly useful in tests.
    pub fn active(
        user_id: impl Into<String>,
        tier: Tier,
        interaction_level: InteractionLevel,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tier,
            interaction_level,
            is_active: true,
            last_active_at: None,
        }
    }

    /// Mark the snapshot inactive.
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}
