//! Scripted stand-ins for the external collaborators and a bus probe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use recoverr::clients::{
    HistoryRecord, QueueItem, QueueService, SearchService, WantedItem,
};
use recoverr::events::{Event, EventHandler, EventKind};
use recoverr::release::QualityTier;

/// Queue service stand-in. Tests set the snapshots it serves; an outage
/// flag makes every queue fetch fail until cleared.
#[derive(Default)]
pub struct StubQueue {
    queue: Mutex<Vec<QueueItem>>,
    history: Mutex<Vec<HistoryRecord>>,
    wanted: Mutex<Vec<WantedItem>>,
    outage: AtomicBool,
    queue_fetches: AtomicUsize,
}

// Not every test binary exercises every helper.
#[allow(dead_code)]
impl StubQueue {
    pub fn set_queue(&self, items: Vec<QueueItem>) {
        *self.queue.lock().unwrap() = items;
    }

    pub fn set_history(&self, records: Vec<HistoryRecord>) {
        *self.history.lock().unwrap() = records;
    }

    pub fn set_wanted(&self, items: Vec<WantedItem>) {
        *self.wanted.lock().unwrap() = items;
    }

    pub fn set_outage(&self, out: bool) {
        self.outage.store(out, Ordering::SeqCst);
    }

    pub fn queue_fetches(&self) -> usize {
        self.queue_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueService for StubQueue {
    async fn get_queue(&self) -> Result<Vec<QueueItem>> {
        self.queue_fetches.fetch_add(1, Ordering::SeqCst);
        if self.outage.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(self.queue.lock().unwrap().clone())
    }

    async fn get_history(&self) -> Result<Vec<HistoryRecord>> {
        if self.outage.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn get_wanted_items(&self, _service: &str) -> Result<Vec<WantedItem>> {
        if self.outage.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(self.wanted.lock().unwrap().clone())
    }
}

/// Search service stand-in. Scripted responses are consumed in order; once
/// the script runs out every search is accepted.
#[derive(Default)]
pub struct StubSearch {
    responses: Mutex<VecDeque<Result<bool>>>,
    calls: Mutex<Vec<(String, Option<QualityTier>)>>,
}

#[allow(dead_code)]
impl StubSearch {
    pub fn script(&self, responses: Vec<Result<bool>>) {
        *self.responses.lock().unwrap() = responses.into();
    }

    pub fn calls(&self) -> Vec<(String, Option<QualityTier>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tiers(&self) -> Vec<Option<QualityTier>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tier)| *tier)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchService for StubSearch {
    async fn search_at_quality(
        &self,
        descriptor: &str,
        tier: Option<QualityTier>,
    ) -> Result<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((descriptor.to_string(), tier));
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(true),
        }
    }
}

/// Wildcard bus subscriber collecting every delivered event.
#[derive(Default)]
pub struct EventProbe {
    events: Mutex<Vec<Event>>,
}

#[allow(dead_code)]
impl EventProbe {
    pub fn all(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events_of(kind).len()
    }
}

#[async_trait]
impl EventHandler for EventProbe {
    fn id(&self) -> &str {
        "event-probe"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
