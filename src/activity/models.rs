//! Data models for the activity log.
//!
//! Defines entries, severities, query filters, pagination, and statistics
//! shapes.

use serde::{Deserialize, Serialize};

/// How serious an activity entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Ordering rank, higher is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
            Severity::Critical => 3,
        }
    }

    /// All severities at or above this one, for "at least" filters.
    pub fn and_above(&self) -> Vec<Severity> {
        [
            Severity::Info,
            Severity::Warning,
            Severity::Error,
            Severity::Critical,
        ]
        .into_iter()
        .filter(|s| s.rank() >= self.rank())
        .collect()
    }
}

/// One recorded activity. Append-only once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Auto-increment id, None until stored
    pub id: Option<i64>,
    /// Component the activity belongs to
    pub service: String,
    /// What happened (event kind string for bus-recorded entries)
    pub activity_type: String,
    /// How serious it is
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Workflow token linking related entries
    pub correlation_id: Option<String>,
    /// Structured context, stored as JSON text
    pub metadata: serde_json::Value,
    /// When the activity happened (Unix timestamp)
    pub timestamp: i64,
    /// When the entry was stored (Unix timestamp)
    pub created_at: i64,
}

impl ActivityEntry {
    /// Create a new entry stamped with the current time.
    pub fn new(
        service: impl Into<String>,
        activity_type: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: None,
            service: service.into(),
            activity_type: activity_type.into(),
            severity,
            message: message.into(),
            correlation_id: None,
            metadata: serde_json::json!({}),
            timestamp: now,
            created_at: now,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Severity matching mode for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityFilter {
    /// Exactly this severity
    Exact(Severity),
    /// This severity or anything more severe
    AtLeast(Severity),
}

/// Query filter. Every field is optional; empty vectors mean "any".
#[derive(Debug, Clone)]
pub struct ActivityFilter {
    /// Restrict to these services
    pub services: Vec<String>,
    /// Restrict to these activity types
    pub activity_types: Vec<String>,
    /// Severity constraint
    pub severity: Option<SeverityFilter>,
    /// Inclusive lower bound on timestamp
    pub from_timestamp: Option<i64>,
    /// Inclusive upper bound on timestamp
    pub until_timestamp: Option<i64>,
    /// Restrict to one workflow
    pub correlation_id: Option<String>,
    /// Free-text search over message and metadata
    pub search: Option<String>,
    /// 1-based page number
    pub page: u32,
    /// Entries per page
    pub page_size: u32,
}

impl Default for ActivityFilter {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            activity_types: Vec::new(),
            severity: None,
            from_timestamp: None,
            until_timestamp: None,
            correlation_id: None,
            search: None,
            page: 1,
            page_size: 50,
        }
    }
}

impl ActivityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.push(service.into());
        self
    }

    pub fn with_activity_type(mut self, activity_type: impl Into<String>) -> Self {
        self.activity_types.push(activity_type.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(SeverityFilter::Exact(severity));
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(SeverityFilter::AtLeast(severity));
        self
    }

    pub fn with_from_timestamp(mut self, from_timestamp: i64) -> Self {
        self.from_timestamp = Some(from_timestamp);
        self
    }

    pub fn with_until_timestamp(mut self, until_timestamp: i64) -> Self {
        self.until_timestamp = Some(until_timestamp);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }
}

/// Pagination metadata attached to a query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Total entries matching the filter, across all pages
    pub total_items: u64,
    /// Total pages at the requested page size
    pub total_pages: u32,
    /// The page these entries belong to (1-based)
    pub page: u32,
    /// Requested page size
    pub page_size: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct ActivityPage {
    pub entries: Vec<ActivityEntry>,
    pub page_info: PageInfo,
}

/// Count of entries sharing one grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBucket {
    pub key: String,
    pub count: u64,
}

/// Count of entries within one time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendBucket {
    /// Start of the bucket (Unix timestamp, hour-aligned)
    pub bucket_start: i64,
    pub count: u64,
}

/// Aggregated view over entries matching a filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStatistics {
    pub total: u64,
    pub by_type: Vec<CountBucket>,
    pub by_service: Vec<CountBucket>,
    pub by_severity: Vec<CountBucket>,
    /// Hourly activity counts, oldest bucket first
    pub trend: Vec<TrendBucket>,
}
