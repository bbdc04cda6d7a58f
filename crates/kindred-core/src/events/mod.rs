//! Engine events.
//!
//! This module provides:
//! - Event types for candidate and emission outcomes
//! - Event bus for internal pub/sub

mod bus;
mod event;

pub use bus::{EventBus, EventSubscriber};
pub use event::{DropReason, EngineEvent};
