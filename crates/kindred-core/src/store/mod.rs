//! Activity repository implementations.
//!
//! - [`InMemoryActivityRepository`]: volatile, for tests and single-process demos
//! - [`SqliteActivityRepository`]: file-backed or in-memory SQLite

mod memory;
mod sqlite;

pub use memory::InMemoryActivityRepository;
pub use sqlite::SqliteActivityRepository;
