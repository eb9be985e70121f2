//! Wire models exchanged with the queue and search collaborators.

use serde::{Deserialize, Serialize};

/// Status a queue item can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueItemStatus {
    Active,
    Paused,
    Failed,
    Completed, // terminal
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Active => "ACTIVE",
            QueueItemStatus::Paused => "PAUSED",
            QueueItemStatus::Failed => "FAILED",
            QueueItemStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(QueueItemStatus::Active),
            "PAUSED" => Some(QueueItemStatus::Paused),
            "FAILED" => Some(QueueItemStatus::Failed),
            "COMPLETED" => Some(QueueItemStatus::Completed),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueueItemStatus::Failed)
    }
}

/// One item currently in the download queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue-assigned identifier
    pub id: String,
    /// Release descriptor / display name
    pub name: String,
    /// Current reported status
    pub status: QueueItemStatus,
    /// Progress, 0.0 to 100.0
    #[serde(default)]
    pub percent_complete: f64,
    /// Queue category (which acquisition service the item belongs to)
    #[serde(default)]
    pub category: String,
    /// Failure text reported by the queue, present for failed items
    #[serde(default)]
    pub fail_message: Option<String>,
}

/// One completed or failed item from the queue history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub name: String,
    pub status: QueueItemStatus,
    /// Failure text, present for failed records
    #[serde(default)]
    pub fail_message: Option<String>,
    #[serde(default)]
    pub category: String,
    /// When the item left the queue (Unix timestamp)
    #[serde(default)]
    pub finished_at: i64,
}

/// One entry from an acquisition service's wanted/missing list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WantedItem {
    pub id: String,
    pub title: String,
    /// Which acquisition service reported it
    #[serde(default)]
    pub service: String,
}
