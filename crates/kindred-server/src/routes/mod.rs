//! Route definitions for the REST API.

mod entries;
mod health;
mod scheduler;
mod users;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Scheduler lifecycle
        .route("/scheduler/status", get(scheduler::status))
        .route("/scheduler/start", post(scheduler::start))
        .route("/scheduler/stop", post(scheduler::stop))
        .route("/scheduler/trigger", post(scheduler::trigger))
        // Journal intake
        .route("/entries", post(entries::submit_entry))
        // Users
        .route("/users/:user_id/settings", put(users::save_settings))
        .route("/users/:user_id/engagement", post(users::record_engagement))
        .route("/users/:user_id/emissions", get(users::list_emissions))
        // Attach state
        .with_state(state)
}

pub use entries::*;
pub use health::*;
pub use scheduler::*;
pub use users::*;
