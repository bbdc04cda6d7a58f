//! Server state management.

use std::sync::Arc;

use kindred_core::ResponseRuntime;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    runtime: Arc<ResponseRuntime>,
}

impl AppState {
    pub fn new(runtime: ResponseRuntime) -> Self {
        Self::from_shared(Arc::new(runtime))
    }

    /// Wrap a runtime that is also held elsewhere (e.g. for shutdown).
    pub fn from_shared(runtime: Arc<ResponseRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &ResponseRuntime {
        &self.runtime
    }

    pub fn shared_runtime(&self) -> Arc<ResponseRuntime> {
        self.runtime.clone()
    }
}
