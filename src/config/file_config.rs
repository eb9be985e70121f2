use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub poll_interval_seconds: Option<u64>,

    // Pattern detection
    pub alert_window_seconds: Option<u64>,
    pub repeated_failure_threshold: Option<usize>,
    pub systemic_failure_threshold: Option<usize>,

    // Failure classification keyword lists
    pub transient_keywords: Option<Vec<String>>,
    pub persistent_keywords: Option<Vec<String>>,
    pub systemic_keywords: Option<Vec<String>>,

    // Recovery settings
    pub max_retry_attempts: Option<u32>,
    pub immediate_retry_enabled: Option<bool>,
    pub exponential_backoff_enabled: Option<bool>,
    pub quality_fallback_enabled: Option<bool>,
    pub backoff_base_delay_seconds: Option<u64>,
    pub backoff_max_delay_seconds: Option<u64>,
    pub backoff_multiplier: Option<f64>,

    // Event bus settings
    pub dead_letter_capacity: Option<usize>,
    pub handler_timeout_seconds: Option<u64>,
    pub worker_pool_size: Option<usize>,

    // Activity log retention
    pub activity_retention_days: Option<u64>,
    pub cleanup_interval_hours: Option<u64>,

    // Collaborators
    pub queue_service: Option<QueueServiceConfig>,
    pub acquisition_services: Option<Vec<AcquisitionServiceConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct QueueServiceConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// One `[[acquisition_services]]` entry. All fields are optional at parse
/// time so a missing field produces a resolve error instead of a TOML one.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AcquisitionServiceConfig {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
