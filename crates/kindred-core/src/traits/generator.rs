//! Generation collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::KindredResult;
use crate::types::{Persona, ResponseKind};

/// Everything a generator needs to write one response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_id: String,
    pub entry_id: String,
    pub entry_content: String,
    pub persona: Persona,
    pub response_kind: ResponseKind,
}

/// Produces the text of a reaction or reply.
///
/// Failures are opaque to the engine: network errors, rate limits and
/// content refusals are all retried on a later tick until the candidate
/// expires. Calls are wrapped in a timeout by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate the response text.
    async fn generate(&self, request: &GenerationRequest) -> KindredResult<String>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "generator"
    }
}
