//! Data models for the monitoring service.

use serde::{Deserialize, Serialize};

/// How a failure is expected to be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// Connectivity hiccup, retry immediately
    Transient,
    /// Integrity or repair failure, retry later or at lower quality
    Persistent,
    /// Resource exhaustion, alert only
    Systemic,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Transient => "TRANSIENT",
            FailureCategory::Persistent => "PERSISTENT",
            FailureCategory::Systemic => "SYSTEMIC",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TRANSIENT" => Some(FailureCategory::Transient),
            "PERSISTENT" => Some(FailureCategory::Persistent),
            "SYSTEMIC" => Some(FailureCategory::Systemic),
            _ => None,
        }
    }
}

/// Payload of a DOWNLOAD_FAILED event. Carries everything recovery needs so
/// it never has to ask the queue service a second time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Queue identifier of the failed item
    pub item_id: String,
    /// Release descriptor / display name
    pub name: String,
    /// Failure text as reported by the queue
    pub reason: String,
    /// Classified category
    pub failure_category: FailureCategory,
    /// Queue category the item belongs to
    pub queue_category: String,
    /// Retries already attempted for this item
    #[serde(default)]
    pub retry_count: u32,
    /// When the failure was detected (Unix timestamp)
    pub detected_at: i64,
}

impl FailureRecord {
    pub fn new(
        item_id: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
        failure_category: FailureCategory,
        queue_category: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            reason: reason.into(),
            failure_category,
            queue_category: queue_category.into(),
            retry_count: 0,
            detected_at: chrono::Utc::now().timestamp(),
        }
    }
}
