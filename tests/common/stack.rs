//! In-process assembly of the whole subsystem against scripted
//! collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use recoverr::activity::{ActivityRecorder, SqliteActivityStore};
use recoverr::clients::SearchService;
use recoverr::config::{MonitorSettings, RecoverySettings, ServiceKind};
use recoverr::events::{EventBus, EventKind};
use recoverr::monitor::MonitorService;
use recoverr::recovery::{create_recovery, RecoveryService};

use super::stubs::{EventProbe, StubQueue, StubSearch};

const BUS_DRAIN_GRACE: Duration = Duration::from_secs(30);

/// The full monitoring/recovery stack wired the way the daemon wires it,
/// with stub collaborators instead of HTTP clients and a wildcard probe
/// on the bus. The monitor is not started; tests drive cycles through
/// [`TestStack::poll`].
#[allow(dead_code)]
pub struct TestStack {
    pub queue: Arc<StubQueue>,
    pub search: Arc<StubSearch>,
    pub probe: Arc<EventProbe>,
    pub store: Arc<SqliteActivityStore>,
    pub monitor: Arc<MonitorService>,
    pub recovery: Arc<RecoveryService>,
    pub bus: Arc<EventBus>,
    pub db_path: PathBuf,
    shutdown: CancellationToken,
    runner_handle: JoinHandle<()>,
    db_dir: TempDir,
}

#[allow(dead_code)]
impl TestStack {
    pub fn start() -> Self {
        Self::with_settings(MonitorSettings::default(), RecoverySettings::default())
    }

    pub fn with_settings(
        monitor_settings: MonitorSettings,
        recovery_settings: RecoverySettings,
    ) -> Self {
        let db_dir = TempDir::new().unwrap();
        let db_path = db_dir.path().join("activity.db");
        let store = Arc::new(SqliteActivityStore::new(&db_path).unwrap());

        let bus = Arc::new(EventBus::with_defaults());
        let probe = Arc::new(EventProbe::default());
        bus.subscribe_all(probe.clone());
        bus.subscribe_all(Arc::new(ActivityRecorder::new(store.clone())));

        let queue = Arc::new(StubQueue::default());
        let monitor = Arc::new(MonitorService::new(
            queue.clone(),
            bus.clone(),
            store.clone(),
            &monitor_settings,
            vec!["tv-shows".to_string()],
        ));

        let search = Arc::new(StubSearch::default());
        let mut searchers: HashMap<ServiceKind, Arc<dyn SearchService>> = HashMap::new();
        searchers.insert(ServiceKind::Series, search.clone());
        searchers.insert(ServiceKind::Movies, search.clone());

        let shutdown = CancellationToken::new();
        let (recovery, runner) = create_recovery(
            bus.clone(),
            store.clone(),
            &recovery_settings,
            searchers,
            shutdown.child_token(),
        );
        bus.subscribe(EventKind::DownloadFailed, recovery.clone());
        let runner_handle = tokio::spawn(runner.run());

        Self {
            queue,
            search,
            probe,
            store,
            monitor,
            recovery,
            bus,
            db_path,
            shutdown,
            runner_handle,
            db_dir,
        }
    }

    /// Run one monitor cycle and let the resulting event chain drain.
    pub async fn poll(&self) {
        self.monitor.poll_once().await;
        settle().await;
    }

    /// Tear the stack down. Returns the database directory guard so
    /// callers can reopen the store after shutdown.
    pub async fn shutdown(self) -> TempDir {
        self.shutdown.cancel();
        self.runner_handle.await.unwrap();
        self.bus.shutdown(BUS_DRAIN_GRACE).await;
        self.db_dir
    }
}

/// Let spawned dispatch and handler tasks run. Costs no wall time under
/// a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
