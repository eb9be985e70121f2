//! Failure text classification.
//!
//! Maps the failure reason reported by the queue service onto a
//! `FailureCategory` via configurable keyword lists.

use tracing::debug;

use crate::config::ClassificationSettings;
use crate::monitor::FailureCategory;

/// Keyword-based failure classifier.
///
/// Matching is case-insensitive substring search. Systemic keywords take
/// precedence over persistent ones, persistent over transient. A reason
/// matching no list is treated as transient and gets a cautious retry.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    transient_keywords: Vec<String>,
    persistent_keywords: Vec<String>,
    systemic_keywords: Vec<String>,
}

impl FailureClassifier {
    /// Create a classifier from configured keyword lists.
    pub fn new(settings: &ClassificationSettings) -> Self {
        Self {
            transient_keywords: lowercase_all(&settings.transient_keywords),
            persistent_keywords: lowercase_all(&settings.persistent_keywords),
            systemic_keywords: lowercase_all(&settings.systemic_keywords),
        }
    }

    /// Create a classifier with the built-in keyword lists.
    pub fn with_defaults() -> Self {
        Self::new(&ClassificationSettings::default())
    }

    /// Classify a failure reason.
    pub fn classify(&self, reason: &str) -> FailureCategory {
        let reason = reason.to_lowercase();

        if matches_any(&reason, &self.systemic_keywords) {
            FailureCategory::Systemic
        } else if matches_any(&reason, &self.persistent_keywords) {
            FailureCategory::Persistent
        } else if matches_any(&reason, &self.transient_keywords) {
            FailureCategory::Transient
        } else {
            debug!("Unclassified failure reason, treating as transient: {}", reason);
            FailureCategory::Transient
        }
    }
}

fn lowercase_all(keywords: &[String]) -> Vec<String> {
    keywords.iter().map(|k| k.to_lowercase()).collect()
}

fn matches_any(reason: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| reason.contains(k.as_str()))
}
