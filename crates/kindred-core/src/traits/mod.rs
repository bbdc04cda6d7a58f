//! Collaborator traits the engine depends on.

mod generator;
mod repository;

pub use generator::*;
pub use repository::*;
