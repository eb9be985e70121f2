//! Dead-letter queue for events whose handler delivery failed.
//!
//! A bounded FIFO of failed deliveries kept for inspection and replay.
//! Capacity eviction drops the oldest entry first.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::models::Event;

pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 100;

/// A single failed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Unique identifier (UUID), distinct from the event id so the same
    /// event failing in two handlers yields two addressable entries
    pub id: String,
    /// The event whose delivery failed
    pub event: Event,
    /// Identifier of the handler that failed
    pub handler_id: String,
    /// What went wrong (error, panic, or timeout description)
    pub error_message: String,
    /// How many times delivery of this event to this handler has failed
    pub retry_count: u32,
    /// When the failure was recorded (Unix timestamp)
    pub timestamp: i64,
}

/// Bounded store of failed deliveries.
pub struct DeadLetterStore {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    capacity: usize,
}

impl DeadLetterStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Record a failed delivery. The entry's retry_count continues from the
    /// highest count already recorded for the same (event, handler) pair, so
    /// replayed events that fail again count up rather than starting over.
    pub fn record(
        &self,
        event: Event,
        handler_id: &str,
        error_message: impl Into<String>,
    ) -> DeadLetterEntry {
        let mut entries = self.entries.lock().unwrap();
        let prior_failures = entries
            .iter()
            .filter(|e| e.event.id == event.id && e.handler_id == handler_id)
            .map(|e| e.retry_count)
            .max()
            .unwrap_or(0);

        let entry = DeadLetterEntry {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            handler_id: handler_id.to_string(),
            error_message: error_message.into(),
            retry_count: prior_failures + 1,
            timestamp: chrono::Utc::now().timestamp(),
        };

        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// Look up an entry by its dead-letter id.
    pub fn get(&self, id: &str) -> Option<DeadLetterEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
