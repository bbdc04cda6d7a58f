//! Builds a runtime from process configuration.

use std::sync::Arc;

use kindred_core::error::KindredResult;
use kindred_core::{ResponseRuntime, RuntimeConfig};
use kindred_llm::{GeneratorConfig, OpenAiGenerator};

/// Create a runtime backed by the OpenAI-compatible generator.
pub fn create_runtime(
    config: RuntimeConfig,
    generator: GeneratorConfig,
) -> KindredResult<ResponseRuntime> {
    let generator = OpenAiGenerator::new(generator)?;
    tracing::debug!(model = generator.model(), "Configured response generator");
    ResponseRuntime::from_config(config, Arc::new(generator))
}
