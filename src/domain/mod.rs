//! Domain layer types and invariants.

pub mod entities;
pub mod error;
pub mod etag;
pub mod types;
