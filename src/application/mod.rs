//! Application services built on the cache and durable-store ports.

pub mod aggregation;
pub mod dashboard;
pub mod error;
pub mod http_cache;
pub mod jobs;
pub mod precompute;
pub mod repos;
