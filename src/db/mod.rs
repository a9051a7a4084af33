//! Database module for uptrail.
//!
//! Defines the persistence interface the scheduler writes through and its
//! SQLite implementation.

mod models;
mod store;

pub use models::*;
pub use store::*;

/// Persistence consumed by the scheduler.
///
/// `save_history` replaces the whole history of a target atomically.
pub trait HistoryStore: Send + Sync {
    fn list_targets(&self) -> Result<Vec<MonitoredTarget>, DbError>;
    fn load_history(&self, target_id: i64) -> Result<Vec<StatusPeriod>, DbError>;
    fn save_history(&self, target_id: i64, history: &[StatusPeriod]) -> Result<(), DbError>;
}
