//! Core data models for match collection and analysis.

mod account;
mod confidence;
mod match_record;
mod stats;

pub use account::*;
pub use confidence::*;
pub use match_record::*;
pub use stats::*;
