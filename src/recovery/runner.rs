//! Executes scheduled recovery attempts when they come due.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::activity::ActivityStore;
use crate::clients::SearchService;
use crate::config::{RecoverySettings, ServiceKind};
use crate::events::EventBus;

use super::service::RecoveryService;

/// Commands accepted by the retry runner.
pub enum RunnerCommand {
    Schedule { item_id: String, due_at: Instant },
}

/// One queued attempt, ordered by due time with a sequence number as
/// tie-breaker so equal deadlines run in scheduling order.
#[derive(Debug, PartialEq, Eq)]
struct DueAttempt {
    due_at: Instant,
    seq: u64,
    item_id: String,
}

impl Ord for DueAttempt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_at
            .cmp(&other.due_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DueAttempt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Timer loop driving [`RecoveryService::execute_attempt`].
pub struct RetryRunner {
    /// Service that executes the attempts this runner dispatches
    service: Arc<RecoveryService>,
    /// Receiver for commands from the recovery service
    commands: mpsc::UnboundedReceiver<RunnerCommand>,
    /// Pending attempts as a min-heap on due time
    pending: BinaryHeap<Reverse<DueAttempt>>,
    seq: u64,
    /// Token to signal runner shutdown
    shutdown: CancellationToken,
}

impl RetryRunner {
    /// Main runner loop. Sleeps until the earliest pending attempt is
    /// due, waking early for new commands or shutdown.
    pub async fn run(mut self) {
        info!("Retry runner starting");
        loop {
            let next_due = self.pending.peek().map(|Reverse(attempt)| attempt.due_at);
            let deadline = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(60));
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => {
                    match command {
                        Some(RunnerCommand::Schedule { item_id, due_at }) => {
                            self.schedule(item_id, due_at);
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline), if next_due.is_some() => {
                    self.dispatch_due();
                }
            }
        }
        info!("Retry runner stopped");
    }

    fn schedule(&mut self, item_id: String, due_at: Instant) {
        self.seq += 1;
        debug!(
            "Queued attempt for {} due in {:?}",
            item_id,
            due_at.duration_since(Instant::now())
        );
        self.pending.push(Reverse(DueAttempt {
            due_at,
            seq: self.seq,
            item_id,
        }));
    }

    /// Spawn execution tasks for every attempt that has come due.
    fn dispatch_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(next)) = self.pending.peek() {
            if next.due_at > now {
                break;
            }
            if let Some(Reverse(attempt)) = self.pending.pop() {
                let service = Arc::clone(&self.service);
                tokio::spawn(async move {
                    service.execute_attempt(&attempt.item_id).await;
                });
            }
        }
    }
}

/// Create a recovery service and the runner that executes its scheduled
/// attempts.
pub fn create_recovery(
    bus: Arc<EventBus>,
    store: Arc<dyn ActivityStore>,
    settings: &RecoverySettings,
    searchers: HashMap<ServiceKind, Arc<dyn SearchService>>,
    shutdown: CancellationToken,
) -> (Arc<RecoveryService>, RetryRunner) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let service = Arc::new(RecoveryService::new(
        bus, store, settings, searchers, command_tx,
    ));
    let runner = RetryRunner {
        service: Arc::clone(&service),
        commands: command_rx,
        pending: BinaryHeap::new(),
        seq: 0,
        shutdown,
    };
    (service, runner)
}
