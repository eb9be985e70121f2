//! Common test infrastructure
//!
//! This module provides everything needed for end-to-end tests: a fully
//! wired in-process stack (event bus, activity log, monitor, recovery,
//! retry runner) backed by scripted collaborators instead of real HTTP
//! services. Tests should only import from this module, not from internal
//! submodules.
//!
//! All tests run on a paused tokio clock, so backoff delays and poll
//! intervals are crossed with `tokio::time::sleep` instead of waiting for
//! real time.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{failed_item, TestStack};
//! use recoverr::events::EventKind;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_failure_is_detected() {
//!     let stack = TestStack::start();
//!     stack.queue.set_queue(vec![failed_item("q1", "Show.S01E01.1080p", "timeout")]);
//!     stack.poll().await;
//!
//!     assert_eq!(stack.probe.count_of(EventKind::DownloadFailed), 1);
//!     stack.shutdown().await;
//! }
//! ```

mod fixtures;
mod stack;
mod stubs;

// Public API - this is what tests import
pub use fixtures::*;
pub use stack::{settle, TestStack};
pub use stubs::{EventProbe, StubQueue, StubSearch};
