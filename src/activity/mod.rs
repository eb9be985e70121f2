//! Activity log module
//!
//! Durable, queryable record of everything that happened: SQLite store with
//! filtered queries, pagination, statistics, retention cleanup, and a bus
//! recorder that persists every published event.

mod models;
mod recorder;
mod schema;
mod store;

pub use models::*;
pub use recorder::ActivityRecorder;
pub use schema::ACTIVITY_LOG_VERSIONED_SCHEMAS;
pub use store::{ActivityStore, SqliteActivityStore};
