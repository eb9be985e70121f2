//! Recovery module
//!
//! Opens a workflow for each failed download and retries it with
//! escalating strategies: immediate retry, quality fallback, exponential
//! backoff. A timer-driven runner executes attempts when they come due.

mod backoff;
mod models;
mod runner;
mod service;

pub use backoff::BackoffPolicy;
pub use models::{RecoveryStrategy, RecoveryWorkflow, StrategyEffectiveness};
pub use runner::{create_recovery, RetryRunner, RunnerCommand};
pub use service::RecoveryService;
