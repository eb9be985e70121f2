//! Data models for the event bus.
//!
//! Defines events, event kinds, and the handler contract shared by every
//! component that publishes or consumes events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of event flowing through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    DownloadFailed,
    DownloadStateChanged,
    FailurePatternDetected,
    RecoveryAttempted,
    RecoverySuccess,
    RecoveryFailed,
    RetriesExhausted, // terminal
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DownloadFailed => "DOWNLOAD_FAILED",
            EventKind::DownloadStateChanged => "DOWNLOAD_STATE_CHANGED",
            EventKind::FailurePatternDetected => "FAILURE_PATTERN_DETECTED",
            EventKind::RecoveryAttempted => "RECOVERY_ATTEMPTED",
            EventKind::RecoverySuccess => "RECOVERY_SUCCESS",
            EventKind::RecoveryFailed => "RECOVERY_FAILED",
            EventKind::RetriesExhausted => "RETRIES_EXHAUSTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DOWNLOAD_FAILED" => Some(EventKind::DownloadFailed),
            "DOWNLOAD_STATE_CHANGED" => Some(EventKind::DownloadStateChanged),
            "FAILURE_PATTERN_DETECTED" => Some(EventKind::FailurePatternDetected),
            "RECOVERY_ATTEMPTED" => Some(EventKind::RecoveryAttempted),
            "RECOVERY_SUCCESS" => Some(EventKind::RecoverySuccess),
            "RECOVERY_FAILED" => Some(EventKind::RecoveryFailed),
            "RETRIES_EXHAUSTED" => Some(EventKind::RetriesExhausted),
            _ => None,
        }
    }

    /// Returns true if this kind closes a failure workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::RecoverySuccess | EventKind::RetriesExhausted)
    }
}

/// A single event published on the bus. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier (UUID)
    pub id: String,
    /// What happened
    pub kind: EventKind,
    /// Component that published the event
    pub source: String,
    /// Workflow token; generated at publish time when absent
    pub correlation_id: Option<String>,
    /// Kind-specific structured payload
    pub payload: serde_json::Value,
    /// When the event was created (Unix timestamp)
    pub timestamp: i64,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(kind: EventKind, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source: source.into(),
            correlation_id: None,
            payload,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Attach a correlation id linking this event to an existing workflow.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Contract for event consumers. Handlers are invoked concurrently (bounded
/// by the bus worker pool) and must tolerate being called from many tasks.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identifier used in logs and dead-letter entries.
    fn id(&self) -> &str;

    /// Process one event. An error return sends the event to the
    /// dead-letter queue for this handler; other handlers are unaffected.
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}
