//! End-to-end monitoring tests
//!
//! Exercise the polling pipeline through the assembled stack: queue
//! snapshots in, events on the bus and durable activity entries out.

mod common;

use std::time::Duration;

use common::{failed_item, history_failure, queue_item, settle, wanted_item, TestStack};
use recoverr::activity::{ActivityFilter, ActivityStore, Severity};
use recoverr::clients::QueueItemStatus;
use recoverr::events::EventKind;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_failure_flows_from_queue_to_bus_and_log() {
    let stack = TestStack::start();
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "Show.S01E01.1080p.WEB",
        "timeout",
    )]);
    stack.poll().await;

    let failed = stack.probe.events_of(EventKind::DownloadFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["item_id"], "q1");
    assert_eq!(failed[0].payload["failure_category"], "TRANSIENT");
    assert_eq!(failed[0].payload["reason"], "timeout");

    let logged = stack
        .store
        .query(&ActivityFilter::new().with_activity_type("DOWNLOAD_FAILED"))
        .unwrap();
    assert_eq!(logged.entries.len(), 1);
    let entry = &logged.entries[0];
    assert_eq!(entry.service, "monitor");
    assert_eq!(entry.severity, Severity::Error);
    assert_eq!(entry.message, "Download failed: Show.S01E01.1080p.WEB (timeout)");
    assert_eq!(entry.correlation_id, failed[0].correlation_id);
    assert_eq!(entry.metadata["queue_category"], "tv");

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_state_transitions_recorded_as_info() {
    let stack = TestStack::start();
    let name = "Show.S01E01.1080p.WEB";
    stack
        .queue
        .set_queue(vec![queue_item("q1", name, QueueItemStatus::Active, None)]);
    stack.poll().await;
    stack
        .queue
        .set_queue(vec![queue_item("q1", name, QueueItemStatus::Completed, None)]);
    stack.poll().await;

    assert_eq!(stack.probe.events_of(EventKind::DownloadStateChanged).len(), 2);

    let logged = stack
        .store
        .query(&ActivityFilter::new().with_activity_type("DOWNLOAD_STATE_CHANGED"))
        .unwrap();
    assert_eq!(logged.entries.len(), 2);
    assert!(logged
        .entries
        .iter()
        .all(|entry| entry.severity == Severity::Info));
    // Newest first.
    assert_eq!(
        logged.entries[0].message,
        format!("{name} changed state: ACTIVE -> COMPLETED")
    );
    assert_eq!(
        logged.entries[1].message,
        format!("{name} changed state: none -> ACTIVE")
    );

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_failure_not_duplicated_across_polls() {
    let stack = TestStack::start();
    stack.queue.set_history(vec![history_failure(
        "h1",
        "Movie.Alpha.2023.1080p",
        "connection reset by peer",
    )]);
    stack.poll().await;
    stack.poll().await;

    let failed = stack.probe.events_of(EventKind::DownloadFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["item_id"], "h1");

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_systemic_pattern_raises_critical_alert() {
    let stack = TestStack::start();
    stack.queue.set_queue(vec![
        failed_item("q1", "Show.A.S01E01.1080p", "no space left on device"),
        failed_item("q2", "Show.B.S02E05.720p", "no space left on device"),
        failed_item("q3", "Movie.C.2021.1080p", "no space left on device"),
    ]);
    stack.poll().await;

    let alerts = stack.probe.events_of(EventKind::FailurePatternDetected);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].payload["pattern_type"], "SYSTEMIC_CAUSE");
    assert_eq!(alerts[0].payload["item_count"], 3);

    let logged = stack
        .store
        .query(&ActivityFilter::new().with_activity_type("FAILURE_PATTERN_DETECTED"))
        .unwrap();
    assert_eq!(logged.entries.len(), 1);
    assert_eq!(logged.entries[0].severity, Severity::Critical);
    assert!(logged.entries[0].message.contains("systemic cause"));

    // Systemic failures are left to the operator.
    assert_eq!(stack.search.call_count(), 0);

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wanted_item_joins_failure_correlation() {
    let stack = TestStack::start();
    stack.queue.set_queue(vec![failed_item(
        "q1",
        "The.Big.Show.S04E02.1080p.WEB.x264",
        "timeout",
    )]);
    stack
        .queue
        .set_wanted(vec![wanted_item("w1", "The Big Show", "tv-shows")]);
    stack.poll().await;
    stack.poll().await;

    let matches = stack
        .store
        .query(&ActivityFilter::new().with_activity_type("WANTED_MATCH"))
        .unwrap();
    assert_eq!(matches.entries.len(), 1);
    let entry = &matches.entries[0];
    assert_eq!(entry.metadata["wanted_id"], "w1");
    assert_eq!(entry.metadata["service"], "tv-shows");
    assert_eq!(entry.metadata["item_id"], "q1");

    let failed = stack.probe.events_of(EventKind::DownloadFailed);
    assert_eq!(entry.correlation_id, failed[0].correlation_id);

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_outage_logged_then_recovered() {
    let stack = TestStack::start();
    stack.queue.set_outage(true);
    stack.poll().await;

    assert!(stack.probe.all().is_empty());
    let logged = stack
        .store
        .query(&ActivityFilter::new().with_activity_type("POLL_CYCLE_FAILED"))
        .unwrap();
    assert_eq!(logged.entries.len(), 1);
    assert_eq!(logged.entries[0].severity, Severity::Warning);
    assert!(logged.entries[0]
        .message
        .contains("Failed to fetch download queue"));

    // The next cycle runs normally.
    stack.queue.set_outage(false);
    stack.queue.set_queue(vec![queue_item(
        "q1",
        "Show.S01E01.1080p",
        QueueItemStatus::Active,
        None,
    )]);
    stack.poll().await;

    assert_eq!(stack.monitor.polls_completed(), 2);
    assert_eq!(stack.queue.queue_fetches(), 2);
    assert_eq!(stack.probe.events_of(EventKind::DownloadStateChanged).len(), 1);

    stack.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_monitor_loop_polls_on_interval() {
    let stack = TestStack::start();
    let shutdown = CancellationToken::new();
    let handle = stack.monitor.start(shutdown.clone());
    settle().await;
    assert_eq!(stack.queue.queue_fetches(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(stack.queue.queue_fetches() >= 2);

    shutdown.cancel();
    handle.await.unwrap();
    stack.shutdown().await;
}
