//! Bridges the event bus into the activity log.
//!
//! Registered as a wildcard subscriber; every published event becomes one
//! activity entry. Store failures are logged and swallowed so a struggling
//! database never poisons the dead-letter queue with recorder entries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::events::{Event, EventHandler, EventKind};

use super::models::{ActivityEntry, Severity};
use super::store::ActivityStore;

/// Wildcard handler persisting events as activity entries.
pub struct ActivityRecorder {
    store: Arc<dyn ActivityStore>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    /// Severity an event kind is recorded at.
    fn severity_for(kind: EventKind) -> Severity {
        match kind {
            EventKind::DownloadFailed => Severity::Error,
            EventKind::DownloadStateChanged => Severity::Info,
            EventKind::FailurePatternDetected => Severity::Critical,
            EventKind::RecoveryAttempted => Severity::Info,
            EventKind::RecoverySuccess => Severity::Info,
            EventKind::RecoveryFailed => Severity::Warning,
            EventKind::RetriesExhausted => Severity::Critical,
        }
    }

    /// Human-readable one-liner composed from the payload fields each kind
    /// is known to carry. Missing fields degrade to the kind name rather
    /// than failing.
    fn describe(event: &Event) -> String {
        let field = |name: &str| -> Option<&str> { event.payload.get(name).and_then(|v| v.as_str()) };
        let name = field("name").unwrap_or("unknown item");

        match event.kind {
            EventKind::DownloadFailed => match field("reason") {
                Some(reason) => format!("Download failed: {} ({})", name, reason),
                None => format!("Download failed: {}", name),
            },
            EventKind::DownloadStateChanged => {
                let previous = field("previous").unwrap_or("none");
                let current = field("current").unwrap_or("unknown");
                format!("{} changed state: {} -> {}", name, previous, current)
            }
            EventKind::FailurePatternDetected => field("description")
                .map(|d| d.to_string())
                .unwrap_or_else(|| "Failure pattern detected".to_string()),
            EventKind::RecoveryAttempted => {
                let strategy = field("strategy").unwrap_or("unknown strategy");
                let attempt = event
                    .payload
                    .get("attempt_number")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                format!("Recovery attempt {} for {} via {}", attempt, name, strategy)
            }
            EventKind::RecoverySuccess => {
                let strategy = field("strategy").unwrap_or("unknown strategy");
                format!("Recovered {} via {}", name, strategy)
            }
            EventKind::RecoveryFailed => match field("reason") {
                Some(reason) => format!("Recovery attempt for {} failed: {}", name, reason),
                None => format!("Recovery attempt for {} failed", name),
            },
            EventKind::RetriesExhausted => {
                let attempts = event
                    .payload
                    .get("total_attempts")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                format!("Giving up on {} after {} attempts", name, attempts)
            }
        }
    }
}

#[async_trait]
impl EventHandler for ActivityRecorder {
    fn id(&self) -> &str {
        "activity-recorder"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let mut entry = ActivityEntry::new(
            event.source.clone(),
            event.kind.as_str(),
            Self::severity_for(event.kind),
            Self::describe(event),
        )
        .with_metadata(event.payload.clone())
        .with_timestamp(event.timestamp);

        if let Some(correlation_id) = &event.correlation_id {
            entry = entry.with_correlation_id(correlation_id.clone());
        }

        if let Err(e) = self.store.create(entry) {
            warn!(
                "Failed to record {} event in activity log: {}",
                event.kind.as_str(),
                e
            );
        }
        Ok(())
    }
}
