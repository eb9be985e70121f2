//! Event bus module
//!
//! In-process publish/subscribe with correlation tracking, bounded concurrent
//! dispatch, and a dead-letter queue for failed deliveries.

mod bus;
mod dead_letter;
mod models;

pub use bus::{BusError, EventBus, EventBusConfig, SubscriptionToken};
pub use dead_letter::{DeadLetterEntry, DeadLetterStore, DEFAULT_DEAD_LETTER_CAPACITY};
pub use models::*;
