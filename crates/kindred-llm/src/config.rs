//! Generator configuration.

use secrecy::SecretString;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Settings for [`OpenAiGenerator`](crate::OpenAiGenerator).
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Model name sent with every request.
    pub model: String,
    pub temperature: f32,
    /// Upper bound on completion length.
    pub max_tokens: u32,
    /// API root; `/chat/completions` is appended.
    pub base_url: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<SecretString>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.8,
            max_tokens: 200,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

impl GeneratorConfig {
    /// Defaults overlaid with `KINDRED_LLM_MODEL`, `KINDRED_LLM_BASE_URL`,
    /// `KINDRED_LLM_TEMPERATURE`, `KINDRED_LLM_MAX_TOKENS` and `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("KINDRED_LLM_MODEL") {
            config.model = model;
        }
        if let Ok(url) = std::env::var("KINDRED_LLM_BASE_URL") {
            config.base_url = url;
        }
        if let Some(t) = std::env::var("KINDRED_LLM_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.temperature = t;
        }
        if let Some(n) = std::env::var("KINDRED_LLM_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_tokens = n;
        }
        config.api_key = std::env::var("OPENAI_API_KEY").ok().map(SecretString::new);
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }
}
