//! In-process publish/subscribe hub with correlation tracking.
//!
//! Each subscription owns its own channel and dispatch task, so a handler
//! sees events in publish order while handlers across subscriptions run
//! concurrently, bounded by a shared worker pool. Failed deliveries land in
//! the dead-letter queue instead of failing the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::dead_letter::{DeadLetterEntry, DeadLetterStore, DEFAULT_DEAD_LETTER_CAPACITY};
use super::models::{Event, EventHandler, EventKind};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is shut down")]
    ShutDown,
    #[error("no dead-letter entry with id {0}")]
    UnknownDeadLetter(String),
}

/// Tuning knobs for the bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Maximum dead-letter entries retained before FIFO eviction
    pub dead_letter_capacity: usize,
    /// How long a single handler invocation may run before being aborted
    pub handler_timeout: Duration,
    /// Maximum handler invocations running at once across all subscriptions
    pub worker_pool_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            handler_timeout: Duration::from_secs(30),
            worker_pool_size: 8,
        }
    }
}

/// Opaque handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(Uuid);

struct Subscription {
    /// None subscribes to every kind
    kind: Option<EventKind>,
    handler_id: String,
    tx: mpsc::UnboundedSender<Arc<Event>>,
    dispatch: JoinHandle<()>,
}

/// The bus. Cheap to share behind an Arc; all methods take `&self`.
pub struct EventBus {
    subscriptions: RwLock<HashMap<Uuid, Subscription>>,
    dead_letters: Arc<DeadLetterStore>,
    workers: Arc<Semaphore>,
    handler_timeout: Duration,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            dead_letters: Arc::new(DeadLetterStore::new(config.dead_letter_capacity)),
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
            handler_timeout: config.handler_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Subscribe a handler to one event kind.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        self.add_subscription(Some(kind), handler)
    }

    /// Subscribe a handler to every event kind.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> SubscriptionToken {
        self.add_subscription(None, handler)
    }

    fn add_subscription(
        &self,
        kind: Option<EventKind>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionToken {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler_id = handler.id().to_string();
        let dispatch = tokio::spawn(dispatch_loop(
            rx,
            handler,
            self.dead_letters.clone(),
            self.workers.clone(),
            self.handler_timeout,
        ));

        let token = Uuid::new_v4();
        self.subscriptions.write().unwrap().insert(
            token,
            Subscription {
                kind,
                handler_id,
                tx,
                dispatch,
            },
        );
        SubscriptionToken(token)
    }

    /// Remove one subscription. Events already queued for it still drain
    /// through its handler. Returns false if the token is unknown.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        let removed = self.subscriptions.write().unwrap().remove(&token.0);
        match removed {
            Some(subscription) => {
                debug!("Unsubscribed handler {}", subscription.handler_id);
                true
            }
            None => false,
        }
    }

    /// Publish an event to every matching subscription. Attaches a generated
    /// correlation id when the event carries none; returns the correlation id
    /// the event went out with.
    pub fn publish(&self, mut event: Event) -> Result<String, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ShutDown);
        }

        let correlation_id = match &event.correlation_id {
            Some(id) => id.clone(),
            None => {
                let generated = Uuid::new_v4().to_string();
                event.correlation_id = Some(generated.clone());
                generated
            }
        };

        let event = Arc::new(event);
        let subscriptions = self.subscriptions.read().unwrap();
        for subscription in subscriptions.values() {
            if subscription.kind.is_none() || subscription.kind == Some(event.kind) {
                // A closed channel means the dispatch task already exited
                let _ = subscription.tx.send(event.clone());
            }
        }
        Ok(correlation_id)
    }

    /// Re-publish the event stored in a dead-letter entry to current
    /// subscribers. The entry stays in the queue; if delivery fails again a
    /// fresh entry is recorded with its retry count continued.
    pub fn replay_dead_letter(&self, id: &str) -> Result<String, BusError> {
        let entry = self
            .dead_letters
            .get(id)
            .ok_or_else(|| BusError::UnknownDeadLetter(id.to_string()))?;
        debug!(
            "Replaying dead-letter entry {} ({} event, handler {})",
            id,
            entry.event.kind.as_str(),
            entry.handler_id
        );
        self.publish(entry.event)
    }

    /// Snapshot of the dead-letter queue, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters.entries()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.len()
    }

    /// Reject new publishes, drain queued deliveries, and wait up to `grace`
    /// for in-flight handlers before aborting what remains.
    pub async fn shutdown(&self, grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);

        let subscriptions: Vec<Subscription> = {
            let mut map = self.subscriptions.write().unwrap();
            map.drain().map(|(_, subscription)| subscription).collect()
        };

        let mut handles = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let Subscription { tx, dispatch, .. } = subscription;
            // Dropping the sender lets the dispatch task drain and exit
            drop(tx);
            handles.push(dispatch);
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(
                "Event bus drain exceeded {}s grace period, aborting remaining dispatch tasks",
                grace.as_secs()
            );
            for handle in abort_handles {
                handle.abort();
            }
        }
    }
}

/// Per-subscription delivery loop. Processes the subscription's queue in
/// order; each invocation takes a worker permit so total concurrency stays
/// within the pool size.
async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<Arc<Event>>,
    handler: Arc<dyn EventHandler>,
    dead_letters: Arc<DeadLetterStore>,
    workers: Arc<Semaphore>,
    handler_timeout: Duration,
) {
    while let Some(event) = rx.recv().await {
        let permit = match workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        invoke_handler(&handler, &event, &dead_letters, handler_timeout).await;
        drop(permit);
    }
}

/// Run one handler invocation in its own task so panics are contained, with
/// a timeout that aborts runaways. Failures of any flavor are recorded as
/// dead letters.
async fn invoke_handler(
    handler: &Arc<dyn EventHandler>,
    event: &Arc<Event>,
    dead_letters: &DeadLetterStore,
    handler_timeout: Duration,
) {
    let mut invocation = tokio::spawn({
        let handler = handler.clone();
        let event = event.clone();
        async move { handler.handle(&event).await }
    });

    match tokio::time::timeout(handler_timeout, &mut invocation).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            warn!(
                "Handler {} failed on {} event: {}",
                handler.id(),
                event.kind.as_str(),
                e
            );
            dead_letters.record((**event).clone(), handler.id(), e.to_string());
        }
        Ok(Err(join_error)) => {
            error!(
                "Handler {} panicked on {} event: {}",
                handler.id(),
                event.kind.as_str(),
                join_error
            );
            dead_letters.record(
                (**event).clone(),
                handler.id(),
                format!("handler panicked: {}", join_error),
            );
        }
        Err(_) => {
            invocation.abort();
            warn!(
                "Handler {} timed out after {}s on {} event",
                handler.id(),
                handler_timeout.as_secs(),
                event.kind.as_str()
            );
            dead_letters.record(
                (**event).clone(),
                handler.id(),
                format!("handler timed out after {}s", handler_timeout.as_secs()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct RecordingHandler {
        id: String,
        seen: Mutex<Vec<Event>>,
    }

    impl RecordingHandler {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<Event> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn id(&self) -> &str {
            &self.id
        }

        async fn handle(&self, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        fn id(&self) -> &str {
            "failing-handler"
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        fn id(&self) -> &str {
            "panicking-handler"
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            panic!("handler exploded")
        }
    }

    struct SlowHandler {
        delay: Duration,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for SlowHandler {
        fn id(&self) -> &str {
            "slow-handler"
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ConcurrencyProbe {
        current: AtomicUsize,
        max_seen: AtomicUsize,
        total: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for ConcurrencyProbe {
        fn id(&self) -> &str {
            "concurrency-probe"
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn failed_event() -> Event {
        Event::new(
            EventKind::DownloadFailed,
            "test",
            serde_json::json!({"item_id": "item-1"}),
        )
    }

    // Paused-time sleep long enough for all queued deliveries to complete
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_subscription_receives_matching_kind_only() {
        let bus = EventBus::with_defaults();
        let handler = RecordingHandler::new("recorder");
        bus.subscribe(EventKind::DownloadFailed, handler.clone());

        bus.publish(failed_event()).unwrap();
        bus.publish(Event::new(
            EventKind::RecoverySuccess,
            "test",
            serde_json::json!({}),
        ))
        .unwrap();
        settle().await;

        let seen = handler.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, EventKind::DownloadFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wildcard_subscription_receives_every_kind() {
        let bus = EventBus::with_defaults();
        let handler = RecordingHandler::new("recorder");
        bus.subscribe_all(handler.clone());

        bus.publish(failed_event()).unwrap();
        bus.publish(Event::new(
            EventKind::RecoverySuccess,
            "test",
            serde_json::json!({}),
        ))
        .unwrap();
        settle().await;

        assert_eq!(handler.seen().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_id_generated_when_absent() {
        let bus = EventBus::with_defaults();
        let handler = RecordingHandler::new("recorder");
        bus.subscribe(EventKind::DownloadFailed, handler.clone());

        let correlation_id = bus.publish(failed_event()).unwrap();
        settle().await;

        assert!(!correlation_id.is_empty());
        let seen = handler.seen();
        assert_eq!(seen[0].correlation_id.as_deref(), Some(&correlation_id[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_id_preserved_when_present() {
        let bus = EventBus::with_defaults();
        let handler = RecordingHandler::new("recorder");
        bus.subscribe(EventKind::DownloadFailed, handler.clone());

        let correlation_id = bus
            .publish(failed_event().with_correlation("workflow-42"))
            .unwrap();
        settle().await;

        assert_eq!(correlation_id, "workflow-42");
        assert_eq!(
            handler.seen()[0].correlation_id.as_deref(),
            Some("workflow-42")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_handler_does_not_affect_healthy_one() {
        let bus = EventBus::with_defaults();
        let healthy = RecordingHandler::new("healthy");
        bus.subscribe(EventKind::DownloadFailed, Arc::new(FailingHandler));
        bus.subscribe(EventKind::DownloadFailed, healthy.clone());

        bus.publish(failed_event()).unwrap();
        settle().await;

        assert_eq!(healthy.seen().len(), 1);
        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].handler_id, "failing-handler");
        assert_eq!(dead[0].error_message, "boom");
        assert_eq!(dead[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_handler_lands_in_dead_letters() {
        let bus = EventBus::with_defaults();
        let healthy = RecordingHandler::new("healthy");
        bus.subscribe(EventKind::DownloadFailed, Arc::new(PanickingHandler));
        bus.subscribe(EventKind::DownloadFailed, healthy.clone());

        bus.publish(failed_event()).unwrap();
        settle().await;

        assert_eq!(healthy.seen().len(), 1);
        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].error_message.contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_into_dead_letters() {
        let bus = EventBus::new(EventBusConfig {
            handler_timeout: Duration::from_secs(1),
            ..EventBusConfig::default()
        });
        let slow = Arc::new(SlowHandler {
            delay: Duration::from_secs(60),
            completed: AtomicUsize::new(0),
        });
        bus.subscribe(EventKind::DownloadFailed, slow.clone());

        bus.publish(failed_event()).unwrap();
        settle().await;

        assert_eq!(slow.completed.load(Ordering::SeqCst), 0);
        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].error_message.contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_subscriber_sees_events_in_publish_order() {
        let bus = EventBus::with_defaults();
        let handler = RecordingHandler::new("recorder");
        bus.subscribe(EventKind::DownloadFailed, handler.clone());

        for i in 0..5 {
            let event = Event::new(
                EventKind::DownloadFailed,
                "test",
                serde_json::json!({"seq": i}),
            )
            .with_correlation("workflow-1");
            bus.publish(event).unwrap();
        }
        settle().await;

        let seen = handler.seen();
        assert_eq!(seen.len(), 5);
        for (i, event) in seen.iter().enumerate() {
            assert_eq!(event.payload["seq"], i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_bounds_concurrency() {
        let bus = EventBus::new(EventBusConfig {
            worker_pool_size: 2,
            ..EventBusConfig::default()
        });
        let probe = Arc::new(ConcurrencyProbe {
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        });
        // Five independent subscriptions all receive the same event
        for _ in 0..5 {
            bus.subscribe(EventKind::DownloadFailed, probe.clone());
        }

        bus.publish(failed_event()).unwrap();
        settle().await;

        assert_eq!(probe.total.load(Ordering::SeqCst), 5);
        assert!(probe.max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::with_defaults();
        let handler = RecordingHandler::new("recorder");
        let token = bus.subscribe(EventKind::DownloadFailed, handler.clone());

        bus.publish(failed_event()).unwrap();
        settle().await;

        assert!(bus.unsubscribe(&token));
        assert!(!bus.unsubscribe(&token));

        bus.publish(failed_event()).unwrap();
        settle().await;

        assert_eq!(handler.seen().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_after_shutdown_is_rejected() {
        let bus = EventBus::with_defaults();
        bus.shutdown(Duration::from_secs(5)).await;

        let result = bus.publish(failed_event());
        assert!(matches!(result, Err(BusError::ShutDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queued_events() {
        let bus = EventBus::with_defaults();
        let slow = Arc::new(SlowHandler {
            delay: Duration::from_millis(10),
            completed: AtomicUsize::new(0),
        });
        bus.subscribe(EventKind::DownloadFailed, slow.clone());

        for _ in 0..5 {
            bus.publish(failed_event()).unwrap();
        }
        bus.shutdown(Duration::from_secs(30)).await;

        assert_eq!(slow.completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_dead_letter_redelivers_same_event() {
        let bus = EventBus::with_defaults();
        let healthy = RecordingHandler::new("healthy");
        bus.subscribe(EventKind::DownloadFailed, Arc::new(FailingHandler));
        bus.subscribe(EventKind::DownloadFailed, healthy.clone());

        bus.publish(failed_event().with_correlation("workflow-9"))
            .unwrap();
        settle().await;

        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        let original_event_id = dead[0].event.id.clone();

        bus.replay_dead_letter(&dead[0].id).unwrap();
        settle().await;

        // Healthy handler saw the same event twice, failing handler failed
        // again and its retry count moved on
        let seen = healthy.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].id, original_event_id);
        assert_eq!(seen[1].correlation_id.as_deref(), Some("workflow-9"));

        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 2);
        assert_eq!(dead[1].retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_unknown_id_errors() {
        let bus = EventBus::with_defaults();
        let result = bus.replay_dead_letter("no-such-entry");
        assert!(matches!(result, Err(BusError::UnknownDeadLetter(_))));
    }
}
