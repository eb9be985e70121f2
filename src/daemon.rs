//! Assembles and runs the whole subsystem.
//!
//! Wires the event bus, activity store, monitor, and recovery together
//! from a resolved configuration, and tears everything down in order on
//! shutdown: loops first, then the bus with a drain grace period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::{ActivityRecorder, ActivityStore, SqliteActivityStore};
use crate::clients::{HttpQueueService, HttpSearchService, QueueService, SearchService};
use crate::config::{AcquisitionServiceSettings, AppConfig, ServiceKind};
use crate::events::{EventBus, EventBusConfig, EventKind};
use crate::monitor::MonitorService;
use crate::recovery::{create_recovery, RecoveryService};

/// Grace period for in-flight handlers when the bus shuts down.
const BUS_DRAIN_GRACE: Duration = Duration::from_secs(30);

pub struct Daemon {
    bus: Arc<EventBus>,
    recovery: Arc<RecoveryService>,
    shutdown: CancellationToken,
    monitor_handle: JoinHandle<()>,
    runner_handle: JoinHandle<()>,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl Daemon {
    /// Build every component and start the background loops.
    pub fn start(config: &AppConfig) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let bus = Arc::new(EventBus::new(EventBusConfig {
            dead_letter_capacity: config.bus.dead_letter_capacity,
            handler_timeout: Duration::from_secs(config.bus.handler_timeout_seconds),
            worker_pool_size: config.bus.worker_pool_size,
        }));

        let db_path = config.activity_db_path();
        info!("Opening activity log at {:?}", db_path);
        let store = Arc::new(
            SqliteActivityStore::new(&db_path)
                .with_context(|| format!("Failed to open activity log at {:?}", db_path))?,
        );
        bus.subscribe_all(Arc::new(ActivityRecorder::new(store.clone())));

        let queue: Arc<dyn QueueService> = Arc::new(HttpQueueService::new(
            config.queue_service.base_url.clone(),
            config.queue_service.api_key.clone(),
            config.queue_service.timeout_seconds,
        ));

        let searchers = build_searchers(&config.acquisition_services);
        let wanted_services: Vec<String> = config
            .acquisition_services
            .iter()
            .map(|service| service.name.clone())
            .collect();

        let (recovery, runner) = create_recovery(
            bus.clone(),
            store.clone(),
            &config.recovery,
            searchers,
            shutdown.child_token(),
        );
        bus.subscribe(EventKind::DownloadFailed, recovery.clone());
        let runner_handle = tokio::spawn(runner.run());

        let monitor = Arc::new(MonitorService::new(
            queue,
            bus.clone(),
            store.clone(),
            &config.monitor,
            wanted_services,
        ));
        let monitor_handle = monitor.start(shutdown.child_token());

        let cleanup_handle = if config.activity.retention_days > 0 {
            info!(
                "Activity retention enabled: keeping {} days, cleaning every {} hours",
                config.activity.retention_days, config.activity.cleanup_interval_hours
            );
            Some(spawn_retention_cleanup(
                store,
                config.activity.retention_days,
                config.activity.cleanup_interval_hours,
                shutdown.child_token(),
            ))
        } else {
            None
        };

        Ok(Self {
            bus,
            recovery,
            shutdown,
            monitor_handle,
            runner_handle,
            cleanup_handle,
        })
    }

    /// Stop the loops, then drain the bus.
    pub async fn shutdown(self) {
        info!("Shutting down...");
        self.shutdown.cancel();
        let _ = self.monitor_handle.await;
        let _ = self.runner_handle.await;
        if let Some(handle) = self.cleanup_handle {
            let _ = handle.await;
        }
        let abandoned = self.recovery.active_recovery_count();
        if abandoned > 0 {
            info!("Leaving {} recovery workflows unfinished", abandoned);
        }
        self.bus.shutdown(BUS_DRAIN_GRACE).await;
        info!("Shutdown complete");
    }
}

/// One search client per media domain. The first configured service of
/// each kind wins.
fn build_searchers(
    services: &[AcquisitionServiceSettings],
) -> HashMap<ServiceKind, Arc<dyn SearchService>> {
    let mut searchers: HashMap<ServiceKind, Arc<dyn SearchService>> = HashMap::new();
    for service in services {
        if searchers.contains_key(&service.kind) {
            warn!(
                "Ignoring duplicate {} service {}",
                service.kind.as_str(),
                service.name
            );
            continue;
        }
        info!(
            "Using {} for {} searches at {}",
            service.name,
            service.kind.as_str(),
            service.base_url
        );
        searchers.insert(
            service.kind,
            Arc::new(HttpSearchService::new(
                service.name.clone(),
                service.base_url.clone(),
                service.api_key.clone(),
                service.timeout_seconds,
            )),
        );
    }
    searchers
}

/// Periodically delete activity entries older than the retention window.
/// The first cleanup runs one full interval after startup.
fn spawn_retention_cleanup(
    store: Arc<SqliteActivityStore>,
    retention_days: u64,
    interval_hours: u64,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_hours * 60 * 60));
        // Skip the first immediate tick, wait for the first interval
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cutoff =
                        chrono::Utc::now().timestamp() - (retention_days as i64 * 24 * 60 * 60);
                    match store.cleanup_older_than(cutoff) {
                        Ok(count) if count > 0 => {
                            info!("Cleaned up {} old activity entries", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("Failed to clean up activity log: {:#}", e);
                        }
                    }
                }
            }
        }
    })
}
