//! Background and event-driven cache maintenance.

mod refresh;
mod warmer;

pub use refresh::{DashboardRefresher, RefreshOutcome};
pub use warmer::{WarmerHandle, WarmerWorker};
