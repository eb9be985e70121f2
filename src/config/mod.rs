mod file_config;

pub use file_config::{AcquisitionServiceConfig, FileConfig, QueueServiceConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub queue_url: Option<String>,
    pub queue_api_key: Option<String>,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,

    pub monitor: MonitorSettings,
    pub recovery: RecoverySettings,
    pub bus: BusSettings,
    pub activity: ActivitySettings,

    pub queue_service: QueueServiceSettings,
    pub acquisition_services: Vec<AcquisitionServiceSettings>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = match file.db_dir.map(PathBuf::from).or_else(|| cli.db_dir.clone()) {
            Some(dir) => dir,
            None => bail!("db_dir must be specified via --db-dir or in config file"),
        };
        if !db_dir.is_dir() {
            bail!("db_dir is not an existing directory: {:?}", db_dir);
        }

        let poll_interval_seconds = file
            .poll_interval_seconds
            .unwrap_or(cli.poll_interval_seconds);
        if poll_interval_seconds == 0 {
            bail!("poll_interval_seconds must be greater than zero");
        }

        let classification = ClassificationSettings {
            transient_keywords: file
                .transient_keywords
                .unwrap_or_else(default_transient_keywords),
            persistent_keywords: file
                .persistent_keywords
                .unwrap_or_else(default_persistent_keywords),
            systemic_keywords: file
                .systemic_keywords
                .unwrap_or_else(default_systemic_keywords),
        };

        let monitor = MonitorSettings {
            poll_interval_seconds,
            alert_window_seconds: file.alert_window_seconds.unwrap_or(900),
            repeated_failure_threshold: file.repeated_failure_threshold.unwrap_or(3),
            systemic_failure_threshold: file.systemic_failure_threshold.unwrap_or(3),
            classification,
        };
        if monitor.repeated_failure_threshold == 0 || monitor.systemic_failure_threshold == 0 {
            bail!("Pattern detection thresholds must be greater than zero");
        }

        let recovery = RecoverySettings {
            max_retry_attempts: file.max_retry_attempts.unwrap_or(3),
            immediate_retry_enabled: file.immediate_retry_enabled.unwrap_or(true),
            exponential_backoff_enabled: file.exponential_backoff_enabled.unwrap_or(true),
            quality_fallback_enabled: file.quality_fallback_enabled.unwrap_or(true),
            backoff_base_delay_seconds: file.backoff_base_delay_seconds.unwrap_or(60),
            backoff_max_delay_seconds: file.backoff_max_delay_seconds.unwrap_or(3600),
            backoff_multiplier: file.backoff_multiplier.unwrap_or(2.0),
        };
        if recovery.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be at least 1, got {}",
                recovery.backoff_multiplier
            );
        }
        if recovery.backoff_max_delay_seconds < recovery.backoff_base_delay_seconds {
            bail!(
                "backoff_max_delay_seconds ({}) must not be smaller than backoff_base_delay_seconds ({})",
                recovery.backoff_max_delay_seconds,
                recovery.backoff_base_delay_seconds
            );
        }

        let bus = BusSettings {
            dead_letter_capacity: file.dead_letter_capacity.unwrap_or(100),
            handler_timeout_seconds: file.handler_timeout_seconds.unwrap_or(30),
            worker_pool_size: file.worker_pool_size.unwrap_or(8),
        };
        if bus.dead_letter_capacity == 0 {
            bail!("dead_letter_capacity must be greater than zero");
        }
        if bus.worker_pool_size == 0 {
            bail!("worker_pool_size must be greater than zero");
        }
        if bus.handler_timeout_seconds == 0 {
            bail!("handler_timeout_seconds must be greater than zero");
        }

        let activity = ActivitySettings {
            retention_days: file.activity_retention_days.unwrap_or(90),
            cleanup_interval_hours: file.cleanup_interval_hours.unwrap_or(24),
        };
        if activity.cleanup_interval_hours == 0 {
            bail!("cleanup_interval_hours must be greater than zero");
        }

        // Queue service - TOML [queue_service] section takes precedence over CLI args
        let queue_file = file.queue_service.unwrap_or_default();
        let base_url = queue_file
            .base_url
            .or_else(|| cli.queue_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Queue service URL must be specified via --queue-url or [queue_service] in config file"
                )
            })?;
        let queue_service = QueueServiceSettings {
            base_url,
            api_key: queue_file.api_key.or_else(|| cli.queue_api_key.clone()),
            timeout_seconds: queue_file.timeout_seconds.unwrap_or(30),
        };

        let mut acquisition_services = Vec::new();
        for entry in file.acquisition_services.unwrap_or_default() {
            let name = match entry.name {
                Some(name) if !name.is_empty() => name,
                _ => bail!("Acquisition service entry is missing a name"),
            };
            let kind_str = entry
                .kind
                .ok_or_else(|| anyhow::anyhow!("Acquisition service {} is missing a kind", name))?;
            let kind = ServiceKind::from_str(&kind_str).ok_or_else(|| {
                anyhow::anyhow!(
                    "Acquisition service {} has unknown kind: {} (expected series or movies)",
                    name,
                    kind_str
                )
            })?;
            let base_url = entry.base_url.ok_or_else(|| {
                anyhow::anyhow!("Acquisition service {} is missing a base_url", name)
            })?;
            acquisition_services.push(AcquisitionServiceSettings {
                name,
                kind,
                base_url,
                api_key: entry.api_key,
                timeout_seconds: entry.timeout_seconds.unwrap_or(30),
            });
        }

        Ok(Self {
            db_dir,
            monitor,
            recovery,
            bus,
            activity,
            queue_service,
            acquisition_services,
        })
    }

    pub fn activity_db_path(&self) -> PathBuf {
        self.db_dir.join("activity.db")
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval_seconds: u64,
    pub alert_window_seconds: u64,
    pub repeated_failure_threshold: usize,
    pub systemic_failure_threshold: usize,
    pub classification: ClassificationSettings,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            alert_window_seconds: 900, // 15 minutes
            repeated_failure_threshold: 3,
            systemic_failure_threshold: 3,
            classification: ClassificationSettings::default(),
        }
    }
}

/// Keyword lists used to map failure text onto a category.
#[derive(Debug, Clone)]
pub struct ClassificationSettings {
    pub transient_keywords: Vec<String>,
    pub persistent_keywords: Vec<String>,
    pub systemic_keywords: Vec<String>,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            transient_keywords: default_transient_keywords(),
            persistent_keywords: default_persistent_keywords(),
            systemic_keywords: default_systemic_keywords(),
        }
    }
}

fn default_transient_keywords() -> Vec<String> {
    [
        "timeout",
        "timed out",
        "connection",
        "unreachable",
        "temporarily unavailable",
        "too many requests",
        "503",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_persistent_keywords() -> Vec<String> {
    [
        "par2",
        "repair failed",
        "crc",
        "checksum",
        "verification failed",
        "unpack failed",
        "extraction failed",
        "corrupt",
        "missing articles",
        "incomplete",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_systemic_keywords() -> Vec<String> {
    [
        "disk full",
        "no space",
        "out of space",
        "out of memory",
        "permission denied",
        "read-only file system",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub max_retry_attempts: u32,
    pub immediate_retry_enabled: bool,
    pub exponential_backoff_enabled: bool,
    pub quality_fallback_enabled: bool,
    pub backoff_base_delay_seconds: u64,
    pub backoff_max_delay_seconds: u64,
    pub backoff_multiplier: f64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            immediate_retry_enabled: true,
            exponential_backoff_enabled: true,
            quality_fallback_enabled: true,
            backoff_base_delay_seconds: 60,
            backoff_max_delay_seconds: 3600, // 1 hour
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub dead_letter_capacity: usize,
    pub handler_timeout_seconds: u64,
    pub worker_pool_size: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            dead_letter_capacity: 100,
            handler_timeout_seconds: 30,
            worker_pool_size: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActivitySettings {
    pub retention_days: u64,
    pub cleanup_interval_hours: u64,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            retention_days: 90,
            cleanup_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueServiceSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

/// Media domain an acquisition service manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Series,
    Movies,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Series => "series",
            ServiceKind::Movies => "movies",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("series") {
            Some(ServiceKind::Series)
        } else if s.eq_ignore_ascii_case("movies") {
            Some(ServiceKind::Movies)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionServiceSettings {
    pub name: String,
    pub kind: ServiceKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}
