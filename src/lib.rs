//! Recoverr Library
//!
//! Monitoring, recovery, and event plumbing for a home media-automation
//! stack: watches a download queue for failures, classifies them, retries
//! with escalating strategies, and keeps a durable activity log of the
//! whole story. Exposed as a library so integration tests can drive the
//! subsystem in-process.

pub mod activity;
pub mod clients;
pub mod config;
pub mod daemon;
pub mod events;
pub mod monitor;
pub mod recovery;
pub mod release;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use activity::{ActivityEntry, ActivityStore, Severity, SqliteActivityStore};
pub use config::AppConfig;
pub use daemon::Daemon;
pub use events::{Event, EventBus, EventHandler, EventKind};
