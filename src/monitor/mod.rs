//! Monitoring module
//!
//! Polls the external download queue, classifies failures by reason text,
//! detects repeated and systemic failure patterns over a sliding window,
//! and turns everything it sees into events on the bus.

mod classifier;
mod models;
mod patterns;
mod service;

pub use classifier::FailureClassifier;
pub use models::*;
pub use patterns::{AlertThrottle, FailurePattern, FailureWindow};
pub use service::MonitorService;
