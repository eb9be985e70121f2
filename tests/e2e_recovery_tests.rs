//! End-to-end recovery tests
//!
//! Drive the whole stack from a queue snapshot to recovery outcomes: the
//! monitor turns failed items into events, the recovery service walks the
//! escalation ladder and the retry runner executes attempts when due.

mod common;

use std::time::Duration;

use common::{failed_item, queue_item, settle, TestStack};
use recoverr::activity::{ActivityFilter, ActivityStore};
use recoverr::clients::QueueItemStatus;
use recoverr::config::{MonitorSettings, RecoverySettings};
use recoverr::events::EventKind;
use recoverr::release::QualityTier;

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovered_end_to_end() {
    let stack = TestStack::start();
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "The.Big.Show.S04E02.1080p.WEB.x264-GRP",
        "timeout",
    )]);
    stack.poll().await;

    // The first transient failure is retried immediately at the original
    // quality.
    let calls = stack.search.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "The.Big.Show.S04E02.1080p.WEB.x264-GRP");
    assert_eq!(calls[0].1, Some(QualityTier::Full1080));

    let failed = stack.probe.events_of(EventKind::DownloadFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["failure_category"], "TRANSIENT");

    let attempts = stack.probe.events_of(EventKind::RecoveryAttempted);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].payload["strategy"], "IMMEDIATE_RETRY");
    assert_eq!(attempts[0].payload["attempt_number"], 1);
    assert_eq!(attempts[0].payload["max_attempts"], 3);

    let successes = stack.probe.events_of(EventKind::RecoverySuccess);
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].payload["quality"], "1080p");

    // The whole workflow shares the failure's correlation id, and the
    // recorded trail can be pulled back out of the log by it.
    let correlation = failed[0].correlation_id.clone().unwrap();
    assert_eq!(attempts[0].correlation_id.as_deref(), Some(&correlation[..]));
    assert_eq!(successes[0].correlation_id.as_deref(), Some(&correlation[..]));

    let trail = stack
        .store
        .query(&ActivityFilter::new().with_correlation_id(&correlation))
        .unwrap();
    let mut types: Vec<&str> = trail
        .entries
        .iter()
        .map(|entry| entry.activity_type.as_str())
        .collect();
    types.sort_unstable();
    assert_eq!(
        types,
        vec!["DOWNLOAD_FAILED", "RECOVERY_ATTEMPTED", "RECOVERY_SUCCESS"]
    );

    assert_eq!(stack.recovery.active_recovery_count(), 0);
    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_walks_down_quality() {
    let stack = TestStack::start();
    // First fallback search is declined, the second accepted.
    stack.search.script(vec![Ok(false), Ok(true)]);
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "Show.S01E01.1080p.WEB.x264",
        "PAR2 repair failed: not enough blocks",
    )]);
    stack.poll().await;

    // 1080p failed persistently, so the searches drop to 720p, then 480p.
    assert_eq!(
        stack.search.tiers(),
        vec![Some(QualityTier::Hd720), Some(QualityTier::Sd480)]
    );

    let attempts = stack.probe.events_of(EventKind::RecoveryAttempted);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].payload["strategy"], "QUALITY_FALLBACK");
    assert_eq!(attempts[1].payload["strategy"], "QUALITY_FALLBACK");

    let failures = stack.probe.events_of(EventKind::RecoveryFailed);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].payload["reason"], "Search was not accepted");

    let successes = stack.probe.events_of(EventKind::RecoverySuccess);
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].payload["quality"], "480p");

    assert_eq!(stack.recovery.active_recovery_count(), 0);
    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_attempt_waits_for_its_delay() {
    let settings = RecoverySettings {
        immediate_retry_enabled: false,
        quality_fallback_enabled: false,
        ..RecoverySettings::default()
    };
    let stack = TestStack::with_settings(MonitorSettings::default(), settings);
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "Show.S01E01.1080p.WEB",
        "timeout",
    )]);
    stack.poll().await;

    // retry_count=0: 60 * 2^0 = 60 seconds until the first attempt.
    assert_eq!(stack.search.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(58)).await;
    assert_eq!(stack.search.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(stack.search.call_count(), 1);
    let attempts = stack.probe.events_of(EventKind::RecoveryAttempted);
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].payload["strategy"], "EXPONENTIAL_BACKOFF");
    assert_eq!(stack.probe.events_of(EventKind::RecoverySuccess).len(), 1);

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_is_terminal_for_the_item() {
    let settings = RecoverySettings {
        max_retry_attempts: 2,
        quality_fallback_enabled: false,
        ..RecoverySettings::default()
    };
    let stack = TestStack::with_settings(MonitorSettings::default(), settings);
    stack.search.script(vec![Ok(false), Ok(false)]);
    let name = "Show.S01E01.1080p.WEB";
    stack.queue.set_queue(vec![failed_item("q1", name, "timeout")]);
    stack.poll().await;

    // Attempt 1 runs immediately and fails, attempt 2 lands on a
    // 60 * 2^1 = 120 second backoff.
    assert_eq!(stack.search.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(121)).await;
    settle().await;
    assert_eq!(stack.search.call_count(), 2);

    let exhausted = stack.probe.events_of(EventKind::RetriesExhausted);
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].payload["total_attempts"], 2);
    assert_eq!(exhausted[0].payload["last_reason"], "Search was not accepted");
    assert_eq!(stack.recovery.active_recovery_count(), 0);

    let logged = stack
        .store
        .query(&ActivityFilter::new().with_activity_type("RETRIES_EXHAUSTED"))
        .unwrap();
    assert_eq!(logged.entries.len(), 1);
    assert_eq!(
        logged.entries[0].message,
        format!("Giving up on {name} after 2 attempts")
    );

    // The item fails again after a manual requeue; the exhausted marker
    // keeps recovery away from it.
    stack
        .queue
        .set_queue(vec![queue_item("q1", name, QueueItemStatus::Active, None)]);
    stack.poll().await;
    stack.queue.set_queue(vec![failed_item("q1", name, "timeout")]);
    stack.poll().await;

    assert_eq!(stack.probe.events_of(EventKind::DownloadFailed).len(), 2);
    assert_eq!(stack.search.call_count(), 2);
    assert_eq!(stack.probe.events_of(EventKind::RecoveryAttempted).len(), 2);

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_systemic_failure_needs_an_operator() {
    let stack = TestStack::start();
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "Show.S01E01.1080p.WEB",
        "disk full",
    )]);
    stack.poll().await;

    let failed = stack.probe.events_of(EventKind::DownloadFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["failure_category"], "SYSTEMIC");

    // No recovery is attempted for systemic causes.
    assert_eq!(stack.search.call_count(), 0);
    assert!(stack.probe.events_of(EventKind::RecoveryAttempted).is_empty());
    assert_eq!(stack.recovery.active_recovery_count(), 0);

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_search_error_is_retried_after_backoff() {
    let stack = TestStack::start();
    stack.search.script(vec![
        Err(anyhow::anyhow!("acquisition service down")),
        Ok(true),
    ]);
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "Show.S01E01.1080p.WEB",
        "timeout",
    )]);
    stack.poll().await;

    let failures = stack.probe.events_of(EventKind::RecoveryFailed);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].payload["reason"]
        .as_str()
        .unwrap()
        .contains("acquisition service down"));

    // The errored attempt counts; the next one waits out the backoff.
    tokio::time::sleep(Duration::from_secs(121)).await;
    settle().await;

    assert_eq!(stack.search.call_count(), 2);
    assert_eq!(stack.probe.events_of(EventKind::RecoverySuccess).len(), 1);
    assert_eq!(stack.recovery.active_recovery_count(), 0);

    stack.shutdown().await;
}
