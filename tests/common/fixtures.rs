//! Builders for queue payloads the stub services hand out.

use recoverr::clients::{HistoryRecord, QueueItem, QueueItemStatus, WantedItem};

#[allow(dead_code)]
pub fn queue_item(
    id: &str,
    name: &str,
    status: QueueItemStatus,
    fail_message: Option<&str>,
) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        name: name.to_string(),
        status,
        percent_complete: 0.0,
        category: "tv".to_string(),
        fail_message: fail_message.map(|s| s.to_string()),
    }
}

/// A queue item that has just failed with the given reason.
#[allow(dead_code)]
pub fn failed_item(id: &str, name: &str, reason: &str) -> QueueItem {
    queue_item(id, name, QueueItemStatus::Failed, Some(reason))
}

#[allow(dead_code)]
pub fn history_failure(id: &str, name: &str, reason: &str) -> HistoryRecord {
    HistoryRecord {
        id: id.to_string(),
        name: name.to_string(),
        status: QueueItemStatus::Failed,
        fail_message: Some(reason.to_string()),
        category: "tv".to_string(),
        finished_at: chrono::Utc::now().timestamp(),
    }
}

#[allow(dead_code)]
pub fn wanted_item(id: &str, title: &str, service: &str) -> WantedItem {
    WantedItem {
        id: id.to_string(),
        title: title.to_string(),
        service: service.to_string(),
    }
}
