//! Queue polling loop.
//!
//! Each cycle fetches the queue and recent history from the external
//! queue service, emits state-transition and failure events, feeds the
//! failure window for pattern detection and correlates acquisition
//! service wanted lists against recent failures. Infrastructure errors
//! never kill the loop, a failed cycle is recorded and the next tick
//! starts fresh.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityEntry, ActivityStore, Severity};
use crate::clients::{HistoryRecord, QueueItem, QueueItemStatus, QueueService};
use crate::config::MonitorSettings;
use crate::events::{Event, EventBus, EventKind};
use crate::release::{normalize_title, ReleaseInfo};

use super::classifier::FailureClassifier;
use super::models::FailureRecord;
use super::patterns::{AlertThrottle, FailureWindow};

const EVENT_SOURCE: &str = "monitor";

/// Upper bound on remembered failure ids. Old entries are evicted FIFO.
const SEEN_FAILURES_CAPACITY: usize = 1024;

/// Active failure lifecycle for one queue item.
struct CorrelationEntry {
    correlation_id: String,
    normalized_title: String,
}

/// Bounded set of failure ids already turned into events.
#[derive(Default)]
struct SeenFailures {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenFailures {
    /// Returns true when the id was not seen before.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= SEEN_FAILURES_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    fn remove(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }
}

pub struct MonitorService {
    queue: Arc<dyn QueueService>,
    bus: Arc<EventBus>,
    store: Arc<dyn ActivityStore>,
    classifier: FailureClassifier,
    window: FailureWindow,
    throttle: AlertThrottle,
    poll_interval: Duration,
    /// Acquisition services whose wanted lists are checked each cycle
    wanted_services: Vec<String>,
    /// Last observed status per queue item id
    last_status: Mutex<HashMap<String, QueueItemStatus>>,
    /// Item id to failure lifecycle, cleared when the item completes
    correlations: Mutex<HashMap<String, CorrelationEntry>>,
    seen_failures: Mutex<SeenFailures>,
    /// (wanted id, correlation id) pairs already recorded
    wanted_matches: Mutex<HashSet<(String, String)>>,
    poll_in_flight: AtomicBool,
    polls_completed: AtomicUsize,
    polls_skipped: AtomicUsize,
}

impl MonitorService {
    pub fn new(
        queue: Arc<dyn QueueService>,
        bus: Arc<EventBus>,
        store: Arc<dyn ActivityStore>,
        settings: &MonitorSettings,
        wanted_services: Vec<String>,
    ) -> Self {
        Self {
            queue,
            bus,
            store,
            classifier: FailureClassifier::new(&settings.classification),
            window: FailureWindow::new(
                settings.alert_window_seconds,
                settings.repeated_failure_threshold,
                settings.systemic_failure_threshold,
            ),
            throttle: AlertThrottle::new(settings.alert_window_seconds),
            poll_interval: Duration::from_secs(settings.poll_interval_seconds),
            wanted_services,
            last_status: Mutex::new(HashMap::new()),
            correlations: Mutex::new(HashMap::new()),
            seen_failures: Mutex::new(SeenFailures::default()),
            wanted_matches: Mutex::new(HashSet::new()),
            poll_in_flight: AtomicBool::new(false),
            polls_completed: AtomicUsize::new(0),
            polls_skipped: AtomicUsize::new(0),
        }
    }

    /// Spawn the polling loop. The first poll runs immediately.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            "Monitoring loop starting (poll interval: {}s)",
            self.poll_interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let monitor = Arc::clone(&self);
                    tokio::spawn(async move { monitor.poll_once().await });
                }
            }
        }
        info!("Monitoring loop stopped");
    }

    /// Run one poll cycle unless a previous one is still in flight.
    pub async fn poll_once(&self) {
        if self
            .poll_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.polls_skipped.fetch_add(1, Ordering::SeqCst);
            debug!("Skipping poll, previous cycle still in flight");
            return;
        }
        if let Err(e) = self.poll_cycle().await {
            warn!("Poll cycle failed: {:#}", e);
            self.record_activity(ActivityEntry::new(
                EVENT_SOURCE,
                "POLL_CYCLE_FAILED",
                Severity::Warning,
                format!("Poll cycle failed: {:#}", e),
            ));
        }
        self.polls_completed.fetch_add(1, Ordering::SeqCst);
        self.poll_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn polls_completed(&self) -> usize {
        self.polls_completed.load(Ordering::SeqCst)
    }

    pub fn polls_skipped(&self) -> usize {
        self.polls_skipped.load(Ordering::SeqCst)
    }

    async fn poll_cycle(&self) -> Result<()> {
        let items = self
            .queue
            .get_queue()
            .await
            .context("Failed to fetch download queue")?;
        for item in &items {
            self.observe_queue_item(item);
        }
        let history = self
            .queue
            .get_history()
            .await
            .context("Failed to fetch queue history")?;
        for record in &history {
            self.observe_history_record(record);
        }
        self.correlate_wanted().await;
        Ok(())
    }

    fn observe_queue_item(&self, item: &QueueItem) {
        let previous = {
            let mut last = self.last_status.lock().unwrap();
            last.insert(item.id.clone(), item.status)
        };
        if previous == Some(item.status) {
            return;
        }
        self.emit_state_change(item, previous);
        if item.status == QueueItemStatus::Completed {
            self.clear_correlation(&item.id);
        }
        if item.status.is_failed() {
            // Suppress the echo of this failure from the history feed.
            self.seen_failures.lock().unwrap().insert(&item.id);
            if let Err(e) = self.handle_failure(
                &item.id,
                &item.name,
                item.fail_message.as_deref(),
                &item.category,
            ) {
                warn!("Failed to process failure of {}: {:#}", item.id, e);
            }
        } else if matches!(previous, Some(p) if p.is_failed()) {
            // The item left the failed state, a later failure is a new one.
            self.seen_failures.lock().unwrap().remove(&item.id);
        }
    }

    fn observe_history_record(&self, record: &HistoryRecord) {
        if !record.status.is_failed() {
            return;
        }
        if !self.seen_failures.lock().unwrap().insert(&record.id) {
            return;
        }
        if let Err(e) = self.handle_failure(
            &record.id,
            &record.name,
            record.fail_message.as_deref(),
            &record.category,
        ) {
            warn!("Failed to process history failure of {}: {:#}", record.id, e);
        }
    }

    fn emit_state_change(&self, item: &QueueItem, previous: Option<QueueItemStatus>) {
        let correlation = self.correlation_for(&item.id);
        let payload = serde_json::json!({
            "item_id": item.id,
            "name": item.name,
            "previous": previous.map(|status| status.as_str()),
            "current": item.status.as_str(),
            "percent_complete": item.percent_complete,
        });
        let mut event = Event::new(EventKind::DownloadStateChanged, EVENT_SOURCE, payload);
        if let Some(correlation) = correlation {
            event = event.with_correlation(correlation);
        }
        self.publish_event(event);
    }

    fn handle_failure(
        &self,
        item_id: &str,
        name: &str,
        fail_message: Option<&str>,
        queue_category: &str,
    ) -> Result<()> {
        let reason = fail_message.unwrap_or("unknown failure");
        let category = self.classifier.classify(reason);
        let correlation_id = self.correlation_entry(item_id, name);
        let record = FailureRecord::new(item_id, name, reason, category, queue_category);
        warn!(
            "Download failed: {} ({:?}, item {}): {}",
            name, category, item_id, reason
        );
        let payload = serde_json::to_value(&record)
            .with_context(|| format!("Failed to serialize failure record for {item_id}"))?;
        self.publish_event(
            Event::new(EventKind::DownloadFailed, EVENT_SOURCE, payload)
                .with_correlation(correlation_id.clone()),
        );
        for pattern in self.window.record(&record) {
            if !self.throttle.should_alert(&pattern.key()) {
                continue;
            }
            warn!("Failure pattern detected: {}", pattern.describe());
            let mut payload = serde_json::to_value(&pattern)
                .context("Failed to serialize failure pattern")?;
            payload["description"] = serde_json::json!(pattern.describe());
            self.publish_event(
                Event::new(EventKind::FailurePatternDetected, EVENT_SOURCE, payload)
                    .with_correlation(correlation_id.clone()),
            );
        }
        Ok(())
    }

    /// Reuse the correlation id of the item's active failure lifecycle,
    /// or start a new one.
    fn correlation_entry(&self, item_id: &str, name: &str) -> String {
        let mut correlations = self.correlations.lock().unwrap();
        correlations
            .entry(item_id.to_string())
            .or_insert_with(|| CorrelationEntry {
                correlation_id: Uuid::new_v4().to_string(),
                normalized_title: ReleaseInfo::parse(name).normalized_title(),
            })
            .correlation_id
            .clone()
    }

    fn correlation_for(&self, item_id: &str) -> Option<String> {
        let correlations = self.correlations.lock().unwrap();
        correlations
            .get(item_id)
            .map(|entry| entry.correlation_id.clone())
    }

    fn clear_correlation(&self, item_id: &str) {
        let removed = self.correlations.lock().unwrap().remove(item_id);
        if let Some(entry) = removed {
            self.wanted_matches
                .lock()
                .unwrap()
                .retain(|(_, correlation)| *correlation != entry.correlation_id);
        }
    }

    /// Check the wanted lists of the configured acquisition services
    /// against recent failures. A wanted item whose normalized title
    /// matches an active failure lifecycle is recorded as already
    /// explained by that failure.
    async fn correlate_wanted(&self) {
        for service in &self.wanted_services {
            let wanted = match self.queue.get_wanted_items(service).await {
                Ok(wanted) => wanted,
                Err(e) => {
                    warn!("Failed to fetch wanted list from {}: {:#}", service, e);
                    continue;
                }
            };
            for item in &wanted {
                self.match_wanted_item(service, &item.id, &item.title);
            }
        }
    }

    fn match_wanted_item(&self, service: &str, wanted_id: &str, wanted_title: &str) {
        let normalized = normalize_title(wanted_title);
        if normalized.is_empty() {
            return;
        }
        let matched = {
            let correlations = self.correlations.lock().unwrap();
            let mut matched = None;
            for (item_id, entry) in correlations.iter() {
                if entry.normalized_title == normalized {
                    matched = Some((item_id.clone(), entry.correlation_id.clone()));
                    break;
                }
            }
            matched
        };
        let Some((item_id, correlation_id)) = matched else {
            return;
        };
        {
            let mut recorded = self.wanted_matches.lock().unwrap();
            if !recorded.insert((wanted_id.to_string(), correlation_id.clone())) {
                return;
            }
        }
        info!(
            "Wanted item {:?} on {} matches failed download {}",
            wanted_title, service, item_id
        );
        self.record_activity(
            ActivityEntry::new(
                EVENT_SOURCE,
                "WANTED_MATCH",
                Severity::Info,
                format!(
                    "Wanted item {:?} on {} matches failed download {}",
                    wanted_title, service, item_id
                ),
            )
            .with_correlation_id(correlation_id)
            .with_metadata(serde_json::json!({
                "wanted_id": wanted_id,
                "service": service,
                "item_id": item_id,
            })),
        );
    }

    fn publish_event(&self, event: Event) {
        let kind = event.kind;
        if let Err(e) = self.bus.publish(event) {
            // Expected while shutting down, the bus rejects publishes.
            debug!("Dropping {} event: {}", kind.as_str(), e);
        }
    }

    fn record_activity(&self, entry: ActivityEntry) {
        if let Err(e) = self.store.create(entry) {
            warn!("Failed to record activity entry: {:#}", e);
        }
    }
}
