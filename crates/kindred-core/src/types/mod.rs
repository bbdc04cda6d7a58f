//! Core types for kindred.

mod entry;
mod persona;
mod profile;
mod response;

pub use entry::*;
pub use persona::*;
pub use profile::*;
pub use response::*;
