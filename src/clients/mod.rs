//! Collaborator clients module
//!
//! Traits and HTTP implementations for the external queue service and the
//! per-domain content search services.

mod models;
mod queue;
mod search;

pub use models::*;
pub use queue::{HttpQueueService, QueueService};
pub use search::{HttpSearchService, SearchService};
