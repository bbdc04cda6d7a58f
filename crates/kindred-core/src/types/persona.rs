//! Response personas.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::profile::Tier;

/// Identifier of a persona, such as `pulse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PersonaId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A named response personality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    /// Only premium users hear from this persona.
    #[serde(default)]
    pub premium_only: bool,
    /// Short description of how the persona talks, handed to the generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Persona {
    /// Create a persona available to every tier.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: PersonaId::new(id),
            name: name.into(),
            premium_only: false,
            voice: None,
        }
    }

    /// Restrict the persona to premium users.
    pub fn premium(mut self) -> Self {
        self.premium_only = true;
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Whether a user on `tier` may receive responses from this persona.
    pub fn available_to(&self, tier: Tier) -> bool {
        !self.premium_only || tier == Tier::Premium
    }
}

static DEFAULT_PERSONAS: Lazy<Vec<Persona>> = Lazy::new(|| {
    vec![
        Persona::new("pulse", "Pulse")
            .with_voice("an upbeat friend who checks in quickly and keeps things light"),
        Persona::new("sage", "Sage")
            .premium()
            .with_voice("a calm, reflective mentor who notices patterns"),
        Persona::new("spark", "Spark")
            .premium()
            .with_voice("an energetic motivator who celebrates small wins"),
        Persona::new("anchor", "Anchor")
            .premium()
            .with_voice("a grounded, steady presence who offers reassurance"),
    ]
});

/// The stock persona roster: Pulse for everyone, three premium personas.
pub fn default_personas() -> Vec<Persona> {
    DEFAULT_PERSONAS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster() {
        let personas = default_personas();
        assert_eq!(personas.len(), 4);
        let free: Vec<_> = personas.iter().filter(|p| p.available_to(Tier::Free)).collect();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].id.as_str(), "pulse");
        assert!(personas.iter().all(|p| p.available_to(Tier::Premium)));
    }

    #[test]
    fn test_persona_id_serializes_as_string() {
        let id = PersonaId::from("sage");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sage\"");
    }
}
