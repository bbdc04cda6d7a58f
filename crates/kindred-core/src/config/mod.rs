//! Configuration system for kindred.

mod policy;

pub use policy::{PolicyTable, TierPolicy};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::clock::DayBoundary;
use crate::error::{KindredError, KindredResult};
use crate::types::{default_personas, Persona, PersonaId};

/// Longest delay a candidate may be scheduled with.
pub const MAX_DELAY_SECS: u64 = 7 * 24 * 60 * 60;
/// Counters reset at the local day boundary, so spacing never exceeds a day.
pub const MAX_SPACING_MINUTES: i64 = 24 * 60;
pub const MAX_HORIZON_HOURS: i64 = 7 * 24;
pub const MAX_WINDOW_DAYS: i64 = 366;
pub const MAX_ENGAGEMENT_WINDOW_MINUTES: i64 = 7 * 24 * 60;
pub const MAX_GENERATION_TIMEOUT_SECS: u64 = 10 * 60;
pub const MAX_DAY_OFFSET_MINUTES: i32 = 18 * 60;
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Candidate delay ranges, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub default_min_secs: u64,
    pub default_max_secs: u64,
    /// Used while the user is actively engaging.
    pub engaged_min_secs: u64,
    pub engaged_max_secs: u64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            default_min_secs: 5 * 60,
            default_max_secs: 60 * 60,
            engaged_min_secs: 60,
            engaged_max_secs: 2 * 60,
        }
    }
}

/// Cadence of the background jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Primary tick over every user with pending candidates (default: 300).
    pub primary_interval_secs: u64,
    /// Accelerated tick restricted to actively engaging users (default: 60).
    pub engaged_interval_secs: u64,
    /// Analytics snapshot interval (default: 900).
    pub analytics_interval_secs: u64,
    /// Cron expression (with seconds, UTC) for daily maintenance.
    pub maintenance_cron: String,
    /// Run one primary tick right after start (default: false).
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            primary_interval_secs: 5 * 60,
            engaged_interval_secs: 60,
            analytics_interval_secs: 15 * 60,
            maintenance_cron: "0 0 4 * * *".to_string(),
            run_on_start: false,
        }
    }
}

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Persona roster.
    pub personas: Vec<Persona>,
    /// Probability and cap table.
    pub policies: PolicyTable,
    /// Delay ranges for new candidates.
    pub delays: DelayConfig,
    /// Background job cadence.
    pub schedule: ScheduleConfig,
    /// Minimum gap between two emissions for one user (default: 30).
    pub min_spacing_minutes: i64,
    /// How long a due candidate may wait before it is dropped (default: 12).
    pub candidate_horizon_hours: i64,
    /// Lookback that makes a user active (default: 7).
    pub activity_window_days: i64,
    /// Lookback that makes a user actively engaging (default: 60).
    pub engagement_window_minutes: i64,
    /// Upper bound on one generation call (default: 10).
    pub generation_timeout_secs: u64,
    /// Local day offset east of UTC in minutes (default: 0).
    pub day_offset_minutes: i32,
    /// Daily counters older than this are purged by maintenance (default: 7).
    pub counter_retention_days: i64,
    /// Users processed concurrently within one tick (default: 8).
    pub max_concurrent_users: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            personas: default_personas(),
            policies: PolicyTable::default(),
            delays: DelayConfig::default(),
            schedule: ScheduleConfig::default(),
            min_spacing_minutes: 30,
            candidate_horizon_hours: 12,
            activity_window_days: 7,
            engagement_window_minutes: 60,
            generation_timeout_secs: 10,
            day_offset_minutes: 0,
            counter_retention_days: 7,
            max_concurrent_users: 8,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> KindredResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| KindredError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| KindredError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| KindredError::Configuration(e.to_string()))?,
            _ => {
                return Err(KindredError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Overlay environment variables.
    ///
    /// Reads:
    /// - `KINDRED_MIN_SPACING_MINUTES`
    /// - `KINDRED_CANDIDATE_HORIZON_HOURS`
    /// - `KINDRED_GENERATION_TIMEOUT_SECS`
    /// - `KINDRED_DAY_OFFSET_MINUTES`
    /// - `KINDRED_PRIMARY_INTERVAL_SECS`
    /// - `KINDRED_ENGAGED_INTERVAL_SECS`
    /// - `KINDRED_MAINTENANCE_CRON`
    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_parse("KINDRED_MIN_SPACING_MINUTES") {
            self.min_spacing_minutes = v;
        }
        if let Some(v) = env_parse("KINDRED_CANDIDATE_HORIZON_HOURS") {
            self.candidate_horizon_hours = v;
        }
        if let Some(v) = env_parse("KINDRED_GENERATION_TIMEOUT_SECS") {
            self.generation_timeout_secs = v;
        }
        if let Some(v) = env_parse("KINDRED_DAY_OFFSET_MINUTES") {
            self.day_offset_minutes = v;
        }
        if let Some(v) = env_parse("KINDRED_PRIMARY_INTERVAL_SECS") {
            self.schedule.primary_interval_secs = v;
        }
        if let Some(v) = env_parse("KINDRED_ENGAGED_INTERVAL_SECS") {
            self.schedule.engaged_interval_secs = v;
        }
        if let Ok(cron) = std::env::var("KINDRED_MAINTENANCE_CRON") {
            self.schedule.maintenance_cron = cron;
        }
        self
    }

    /// Check the configuration for values the engine cannot work with.
    pub fn validate(&self) -> KindredResult<()> {
        self.policies.validate()?;

        if self.personas.is_empty() {
            return Err(KindredError::configuration("At least one persona is required"));
        }
        let mut seen = HashSet::new();
        for persona in &self.personas {
            if !seen.insert(persona.id.clone()) {
                return Err(KindredError::configuration(format!(
                    "Duplicate persona id '{}'",
                    persona.id
                )));
            }
        }

        let d = &self.delays;
        if d.default_min_secs > d.default_max_secs || d.engaged_min_secs > d.engaged_max_secs {
            return Err(KindredError::configuration(
                "Delay ranges must have min <= max",
            ));
        }
        if d.default_max_secs > MAX_DELAY_SECS || d.engaged_max_secs > MAX_DELAY_SECS {
            return Err(KindredError::configuration(format!(
                "Delays must not exceed {} seconds",
                MAX_DELAY_SECS
            )));
        }

        let s = &self.schedule;
        if s.primary_interval_secs == 0
            || s.engaged_interval_secs == 0
            || s.analytics_interval_secs == 0
        {
            return Err(KindredError::configuration("Schedule intervals must be positive"));
        }
        in_range("primary_interval_secs", s.primary_interval_secs, 1, MAX_INTERVAL_SECS)?;
        in_range("engaged_interval_secs", s.engaged_interval_secs, 1, MAX_INTERVAL_SECS)?;
        in_range("analytics_interval_secs", s.analytics_interval_secs, 1, MAX_INTERVAL_SECS)?;

        in_range("min_spacing_minutes", self.min_spacing_minutes, 0, MAX_SPACING_MINUTES)?;
        in_range("candidate_horizon_hours", self.candidate_horizon_hours, 1, MAX_HORIZON_HOURS)?;
        in_range("activity_window_days", self.activity_window_days, 1, MAX_WINDOW_DAYS)?;
        in_range(
            "engagement_window_minutes",
            self.engagement_window_minutes,
            0,
            MAX_ENGAGEMENT_WINDOW_MINUTES,
        )?;
        in_range("counter_retention_days", self.counter_retention_days, 1, MAX_WINDOW_DAYS)?;
        in_range(
            "day_offset_minutes",
            self.day_offset_minutes,
            -MAX_DAY_OFFSET_MINUTES,
            MAX_DAY_OFFSET_MINUTES,
        )?;
        in_range(
            "generation_timeout_secs",
            self.generation_timeout_secs,
            1,
            MAX_GENERATION_TIMEOUT_SECS,
        )?;
        if self.max_concurrent_users == 0 {
            return Err(KindredError::configuration("max_concurrent_users must be positive"));
        }
        Ok(())
    }

    /// Look up a persona by id.
    pub fn persona(&self, id: &PersonaId) -> Option<&Persona> {
        self.personas.iter().find(|p| &p.id == id)
    }

    pub fn min_spacing(&self) -> KindredResult<chrono::Duration> {
        span(
            "min_spacing_minutes",
            chrono::Duration::try_minutes(self.min_spacing_minutes),
        )
    }

    pub fn candidate_horizon(&self) -> KindredResult<chrono::Duration> {
        span(
            "candidate_horizon_hours",
            chrono::Duration::try_hours(self.candidate_horizon_hours),
        )
    }

    pub fn activity_window(&self) -> KindredResult<chrono::Duration> {
        span(
            "activity_window_days",
            chrono::Duration::try_days(self.activity_window_days),
        )
    }

    pub fn engagement_window(&self) -> KindredResult<chrono::Duration> {
        span(
            "engagement_window_minutes",
            chrono::Duration::try_minutes(self.engagement_window_minutes),
        )
    }

    pub fn counter_retention(&self) -> KindredResult<chrono::Duration> {
        span(
            "counter_retention_days",
            chrono::Duration::try_days(self.counter_retention_days),
        )
    }

    pub fn generation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn day_boundary(&self) -> DayBoundary {
        DayBoundary::with_offset_minutes(self.day_offset_minutes)
    }

    /// Set the policy table.
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Set the persona roster.
    pub fn with_personas(mut self, personas: Vec<Persona>) -> Self {
        self.personas = personas;
        self
    }

    /// Set the primary tick interval (minimum 1 second).
    pub fn with_primary_interval_secs(mut self, secs: u64) -> Self {
        self.schedule.primary_interval_secs = secs.max(1);
        self
    }

    /// Run a primary tick immediately on start.
    pub fn with_run_on_start(mut self) -> Self {
        self.schedule.run_on_start = true;
        self
    }
}

fn in_range<T>(field: &str, value: T, min: T, max: T) -> KindredResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(KindredError::configuration(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, value
        )));
    }
    Ok(())
}

fn span(field: &str, value: Option<chrono::Duration>) -> KindredResult<chrono::Duration> {
    value.ok_or_else(|| KindredError::configuration(format!("{} is out of range", field)))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
