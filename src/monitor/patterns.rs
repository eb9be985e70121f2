//! Failure pattern detection.
//!
//! Tracks recent failures in a sliding time window and recognizes patterns
//! that deserve a higher-severity alert than a single item failure.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::monitor::{FailureCategory, FailureRecord};
use crate::release::ReleaseInfo;

/// A recognized failure pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pattern_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePattern {
    /// The same content failed repeatedly within the window.
    RepeatedFailure { content: String, occurrences: usize },
    /// Unrelated items failed with a systemic cause within the window.
    SystemicCause {
        item_count: usize,
        reasons: Vec<String>,
    },
}

impl FailurePattern {
    /// Stable key identifying the pattern for alert throttling.
    pub fn key(&self) -> String {
        match self {
            FailurePattern::RepeatedFailure { content, .. } => format!("repeated:{}", content),
            FailurePattern::SystemicCause { .. } => "systemic".to_string(),
        }
    }

    /// Human-readable description for logs and activity entries.
    pub fn describe(&self) -> String {
        match self {
            FailurePattern::RepeatedFailure {
                content,
                occurrences,
            } => {
                format!("{} failed {} times within the window", content, occurrences)
            }
            FailurePattern::SystemicCause { item_count, reasons } => format!(
                "{} unrelated items failed with a systemic cause: {}",
                item_count,
                reasons.join("; ")
            ),
        }
    }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    timestamp: i64,
    item_id: String,
    /// Content identity key, recognizes the same content across re-queues
    /// under different item ids.
    content: String,
    category: FailureCategory,
    reason: String,
}

/// Sliding window of recent failures.
pub struct FailureWindow {
    entries: Mutex<VecDeque<WindowEntry>>,
    window_secs: i64,
    repeated_threshold: usize,
    systemic_threshold: usize,
}

impl FailureWindow {
    pub fn new(window_secs: u64, repeated_threshold: usize, systemic_threshold: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            window_secs: window_secs as i64,
            repeated_threshold,
            systemic_threshold,
        }
    }

    /// Record a failure and return any patterns it completes.
    pub fn record(&self, record: &FailureRecord) -> Vec<FailurePattern> {
        self.record_at(record, chrono::Utc::now().timestamp())
    }

    fn record_at(&self, record: &FailureRecord, now: i64) -> Vec<FailurePattern> {
        let mut entries = self.entries.lock().unwrap();

        Self::prune_old_entries(&mut entries, now, self.window_secs);

        let content = ReleaseInfo::parse(&record.name).content_key();
        entries.push_back(WindowEntry {
            timestamp: now,
            item_id: record.item_id.clone(),
            content: content.clone(),
            category: record.failure_category,
            reason: record.reason.clone(),
        });

        let mut patterns = Vec::new();

        if !content.is_empty() {
            let occurrences = entries.iter().filter(|e| e.content == content).count();
            if occurrences >= self.repeated_threshold {
                patterns.push(FailurePattern::RepeatedFailure {
                    content,
                    occurrences,
                });
            }
        }

        // Only the newest failure can complete a systemic pattern
        if record.failure_category == FailureCategory::Systemic {
            let systemic: Vec<&WindowEntry> = entries
                .iter()
                .filter(|e| e.category == FailureCategory::Systemic)
                .collect();
            let distinct_items: HashSet<&str> =
                systemic.iter().map(|e| e.item_id.as_str()).collect();
            if distinct_items.len() >= self.systemic_threshold {
                let mut reasons: Vec<String> =
                    systemic.iter().map(|e| e.reason.clone()).collect();
                reasons.sort();
                reasons.dedup();
                patterns.push(FailurePattern::SystemicCause {
                    item_count: distinct_items.len(),
                    reasons,
                });
            }
        }

        patterns
    }

    /// Drop entries that fell out of the window.
    fn prune_old_entries(entries: &mut VecDeque<WindowEntry>, now: i64, window_secs: i64) {
        let cutoff = now - window_secs;
        while let Some(front) = entries.front() {
            if front.timestamp < cutoff {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Suppresses duplicate alerts: at most one alert per pattern key per window.
pub struct AlertThrottle {
    last_alerted: Mutex<HashMap<String, i64>>,
    window_secs: i64,
}

impl AlertThrottle {
    pub fn new(window_secs: u64) -> Self {
        Self {
            last_alerted: Mutex::new(HashMap::new()),
            window_secs: window_secs as i64,
        }
    }

    /// Returns true when an alert for this key should fire now, and records
    /// the alert so repeats within the window stay silent.
    pub fn should_alert(&self, key: &str) -> bool {
        self.should_alert_at(key, chrono::Utc::now().timestamp())
    }

    fn should_alert_at(&self, key: &str, now: i64) -> bool {
        let mut last_alerted = self.last_alerted.lock().unwrap();
        last_alerted.retain(|_, at| now - *at < self.window_secs);
        if last_alerted.contains_key(key) {
            return false;
        }
        last_alerted.insert(key.to_string(), now);
        true
    }
}
