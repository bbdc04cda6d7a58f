//! kindred-llm - Response generators for kindred.
//!
//! Implements [`ResponseGenerator`] on top of an OpenAI-compatible
//! chat-completions endpoint.
//!
//! # Example
//!
//! ```ignore
//! use kindred_llm::{GeneratorConfig, OpenAiGenerator};
//!
//! let generator = OpenAiGenerator::new(GeneratorConfig::from_env())?;
//! let runtime = ResponseRuntime::new(config, repository, Arc::new(generator))?;
//! ```

mod config;
mod openai;
mod prompt;

pub use config::GeneratorConfig;
pub use openai::OpenAiGenerator;
pub use prompt::{build_messages, ChatMessage};

// Re-export core types for convenience
pub use kindred_core::traits::{GenerationRequest, ResponseGenerator};
