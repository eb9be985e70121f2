//! Recovery orchestration.
//!
//! Subscribes to failure events, opens one workflow per failed item and
//! walks it through the escalation ladder: immediate retry for the first
//! transient failure, quality fallback while a persistent failure still
//! has a lower tier to try, exponential backoff otherwise. Every attempt
//! asks the matching acquisition service to re-search the content; an
//! accepted search closes the workflow.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityEntry, ActivityStore, Severity};
use crate::clients::SearchService;
use crate::config::{RecoverySettings, ServiceKind};
use crate::events::{Event, EventBus, EventHandler, EventKind};
use crate::monitor::{FailureCategory, FailureRecord};
use crate::release::{MediaKind, ReleaseInfo};

use super::backoff::BackoffPolicy;
use super::models::{RecoveryStrategy, RecoveryWorkflow, StrategyEffectiveness};
use super::runner::RunnerCommand;

const EVENT_SOURCE: &str = "recovery";

pub struct RecoveryService {
    bus: Arc<EventBus>,
    store: Arc<dyn ActivityStore>,
    settings: RecoverySettings,
    backoff: BackoffPolicy,
    /// Search collaborators by media domain
    searchers: HashMap<ServiceKind, Arc<dyn SearchService>>,
    /// Sender half of the retry runner's command channel
    scheduler: mpsc::UnboundedSender<RunnerCommand>,
    /// Active workflows by item id. Presence means recovery is in
    /// progress, which makes duplicate failure events no-ops.
    workflows: Mutex<HashMap<String, RecoveryWorkflow>>,
    /// Items whose retries ran out. Kept for the process lifetime.
    terminal: Mutex<HashSet<String>>,
    effectiveness: Mutex<HashMap<RecoveryStrategy, StrategyEffectiveness>>,
}

impl RecoveryService {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<dyn ActivityStore>,
        settings: &RecoverySettings,
        searchers: HashMap<ServiceKind, Arc<dyn SearchService>>,
        scheduler: mpsc::UnboundedSender<RunnerCommand>,
    ) -> Self {
        Self {
            bus,
            store,
            settings: settings.clone(),
            backoff: BackoffPolicy::new(settings),
            searchers,
            scheduler,
            workflows: Mutex::new(HashMap::new()),
            terminal: Mutex::new(HashSet::new()),
            effectiveness: Mutex::new(HashMap::new()),
        }
    }

    /// Outcome counters per strategy.
    pub fn effectiveness(&self) -> HashMap<RecoveryStrategy, StrategyEffectiveness> {
        self.effectiveness.lock().unwrap().clone()
    }

    /// Number of workflows currently in progress.
    pub fn active_recovery_count(&self) -> usize {
        self.workflows.lock().unwrap().len()
    }

    fn on_download_failed(&self, event: &Event) -> Result<()> {
        let record: FailureRecord = serde_json::from_value(event.payload.clone())
            .context("Malformed DOWNLOAD_FAILED payload")?;
        if record.failure_category == FailureCategory::Systemic {
            debug!(
                "Not recovering {}, systemic failures need operator attention",
                record.item_id
            );
            return Ok(());
        }
        if self.terminal.lock().unwrap().contains(&record.item_id) {
            debug!("Ignoring failure of {}, retries exhausted", record.item_id);
            return Ok(());
        }
        if self.workflows.lock().unwrap().contains_key(&record.item_id) {
            debug!("Recovery already in progress for {}", record.item_id);
            return Ok(());
        }

        let correlation_id = event
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let workflow = RecoveryWorkflow {
            item_id: record.item_id.clone(),
            name: record.name.clone(),
            correlation_id,
            category: record.failure_category,
            reason: record.reason.clone(),
            retry_count: record.retry_count,
            current_tier: ReleaseInfo::parse(&record.name).tier,
            next_strategy: RecoveryStrategy::ExponentialBackoff,
            scheduled_for: None,
        };
        info!(
            "Starting recovery for {} ({:?}: {})",
            workflow.name, workflow.category, workflow.reason
        );
        self.schedule_next_attempt(workflow);
        Ok(())
    }

    /// Pick a strategy for the workflow's next attempt and hand it to the
    /// retry runner. Exhausted and strategy-less workflows end here.
    fn schedule_next_attempt(&self, mut workflow: RecoveryWorkflow) {
        if workflow.retry_count >= self.settings.max_retry_attempts {
            self.finish_exhausted(workflow);
            return;
        }
        let Some((strategy, delay)) = self.select_strategy(&mut workflow) else {
            warn!(
                "No eligible recovery strategy for {} ({:?}), giving up",
                workflow.name, workflow.category
            );
            self.record_activity(
                ActivityEntry::new(
                    EVENT_SOURCE,
                    "RECOVERY_SKIPPED",
                    Severity::Warning,
                    format!("No eligible recovery strategy for {}", workflow.name),
                )
                .with_correlation_id(workflow.correlation_id.clone()),
            );
            self.workflows.lock().unwrap().remove(&workflow.item_id);
            return;
        };
        workflow.next_strategy = strategy;
        workflow.scheduled_for = if delay.is_zero() {
            None
        } else {
            Some(chrono::Utc::now().timestamp() + delay.as_secs() as i64)
        };
        debug!(
            "Scheduled {} attempt {} for {} in {:?}",
            strategy.as_str(),
            workflow.retry_count + 1,
            workflow.item_id,
            delay
        );
        let item_id = workflow.item_id.clone();
        self.workflows
            .lock()
            .unwrap()
            .insert(item_id.clone(), workflow);
        let command = RunnerCommand::Schedule {
            item_id,
            due_at: Instant::now() + delay,
        };
        if self.scheduler.send(command).is_err() {
            debug!("Retry runner is gone, dropping scheduled attempt");
        }
    }

    fn select_strategy(
        &self,
        workflow: &mut RecoveryWorkflow,
    ) -> Option<(RecoveryStrategy, Duration)> {
        if workflow.category == FailureCategory::Transient
            && workflow.retry_count == 0
            && self.settings.immediate_retry_enabled
        {
            return Some((RecoveryStrategy::ImmediateRetry, Duration::ZERO));
        }
        if workflow.category == FailureCategory::Persistent
            && self.settings.quality_fallback_enabled
        {
            if let Some(lower) = workflow.current_tier.and_then(|tier| tier.next_lower()) {
                workflow.current_tier = Some(lower);
                return Some((RecoveryStrategy::QualityFallback, Duration::ZERO));
            }
        }
        if self.settings.exponential_backoff_enabled {
            return Some((
                RecoveryStrategy::ExponentialBackoff,
                self.backoff.delay_for_retry(workflow.retry_count),
            ));
        }
        None
    }

    /// Execute one scheduled attempt. Called by the retry runner when the
    /// attempt comes due.
    pub async fn execute_attempt(&self, item_id: &str) {
        let workflow = {
            let mut workflows = self.workflows.lock().unwrap();
            match workflows.get_mut(item_id) {
                Some(workflow) => {
                    workflow.retry_count += 1;
                    workflow.clone()
                }
                None => {
                    debug!("No active recovery for {}, skipping attempt", item_id);
                    return;
                }
            }
        };
        let strategy = workflow.next_strategy;
        self.note_attempt(strategy);
        info!(
            "Recovery attempt {}/{} for {} using {}",
            workflow.retry_count,
            self.settings.max_retry_attempts,
            workflow.name,
            strategy.as_str()
        );
        self.publish_event(
            Event::new(
                EventKind::RecoveryAttempted,
                EVENT_SOURCE,
                serde_json::json!({
                    "item_id": workflow.item_id,
                    "name": workflow.name,
                    "strategy": strategy.as_str(),
                    "attempt_number": workflow.retry_count,
                    "max_attempts": self.settings.max_retry_attempts,
                    "quality": workflow.current_tier.map(|tier| tier.as_str()),
                    "scheduled_for": workflow.scheduled_for,
                }),
            )
            .with_correlation(workflow.correlation_id.clone()),
        );

        match self.run_search(&workflow).await {
            Ok(true) => self.attempt_succeeded(workflow),
            Ok(false) => self.attempt_failed(workflow, "Search was not accepted".to_string()),
            Err(e) => self.attempt_failed(workflow, format!("{e:#}")),
        }
    }

    /// Route the search to the acquisition service matching the release
    /// descriptor's media domain.
    async fn run_search(&self, workflow: &RecoveryWorkflow) -> Result<bool> {
        let info = ReleaseInfo::parse(&workflow.name);
        let kind = match info.kind {
            MediaKind::Series { .. } => ServiceKind::Series,
            MediaKind::Movie { .. } => ServiceKind::Movies,
            MediaKind::Unknown => bail!(
                "Cannot route search, unrecognized release descriptor: {}",
                workflow.name
            ),
        };
        let Some(searcher) = self.searchers.get(&kind) else {
            bail!("No {} search service configured", kind.as_str());
        };
        searcher
            .search_at_quality(&workflow.name, workflow.current_tier)
            .await
    }

    fn attempt_succeeded(&self, workflow: RecoveryWorkflow) {
        self.note_success(workflow.next_strategy);
        info!(
            "Recovery succeeded for {} on attempt {}",
            workflow.name, workflow.retry_count
        );
        self.publish_event(
            Event::new(
                EventKind::RecoverySuccess,
                EVENT_SOURCE,
                serde_json::json!({
                    "item_id": workflow.item_id,
                    "name": workflow.name,
                    "strategy": workflow.next_strategy.as_str(),
                    "attempt_number": workflow.retry_count,
                    "quality": workflow.current_tier.map(|tier| tier.as_str()),
                }),
            )
            .with_correlation(workflow.correlation_id.clone()),
        );
        self.workflows.lock().unwrap().remove(&workflow.item_id);
    }

    fn attempt_failed(&self, mut workflow: RecoveryWorkflow, reason: String) {
        self.note_failure(workflow.next_strategy);
        warn!(
            "Recovery attempt {} for {} failed: {}",
            workflow.retry_count, workflow.name, reason
        );
        self.publish_event(
            Event::new(
                EventKind::RecoveryFailed,
                EVENT_SOURCE,
                serde_json::json!({
                    "item_id": workflow.item_id,
                    "name": workflow.name,
                    "strategy": workflow.next_strategy.as_str(),
                    "attempt_number": workflow.retry_count,
                    "reason": reason,
                }),
            )
            .with_correlation(workflow.correlation_id.clone()),
        );
        workflow.reason = reason;
        self.schedule_next_attempt(workflow);
    }

    fn finish_exhausted(&self, workflow: RecoveryWorkflow) {
        warn!(
            "Retries exhausted for {} after {} attempts",
            workflow.name, workflow.retry_count
        );
        self.publish_event(
            Event::new(
                EventKind::RetriesExhausted,
                EVENT_SOURCE,
                serde_json::json!({
                    "item_id": workflow.item_id,
                    "name": workflow.name,
                    "total_attempts": workflow.retry_count,
                    "last_reason": workflow.reason,
                }),
            )
            .with_correlation(workflow.correlation_id.clone()),
        );
        self.terminal.lock().unwrap().insert(workflow.item_id.clone());
        self.workflows.lock().unwrap().remove(&workflow.item_id);
    }

    fn note_attempt(&self, strategy: RecoveryStrategy) {
        self.effectiveness
            .lock()
            .unwrap()
            .entry(strategy)
            .or_default()
            .attempts += 1;
    }

    fn note_success(&self, strategy: RecoveryStrategy) {
        self.effectiveness
            .lock()
            .unwrap()
            .entry(strategy)
            .or_default()
            .successes += 1;
    }

    fn note_failure(&self, strategy: RecoveryStrategy) {
        self.effectiveness
            .lock()
            .unwrap()
            .entry(strategy)
            .or_default()
            .failures += 1;
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

#[async_trait]
impl EventHandler for RecoveryService {
    fn id(&self) -> &str {
        "recovery"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if event.kind == EventKind::DownloadFailed {
            self.on_download_failed(event)?;
        }
        Ok(())
    }
}
