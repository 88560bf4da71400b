use dashmap::DashMap;
use moka::sync::Cache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use super::query::{Query, QueryStatus};
use super::request::QueryRequest;
use crate::backend::CancelSignal;
use crate::data::NormalizedResult;

const DEFAULT_RETENTION: Duration = Duration::from_secs(3_600);

struct Record {
    tx: watch::Sender<Query>,
    request: Arc<QueryRequest>,
    /// Dropped once the query is terminal
    cancel: Mutex<Option<CancelSignal>>,
    result: Mutex<Option<Arc<NormalizedResult>>>,
}

/// Live query records; every change is published to the record's watchers.
///
/// Pending and running queries are held until they finish. Finished ones
/// move to a retention cache and are evicted after the retention period.
pub struct QueryStore {
    live: DashMap<Uuid, Arc<Record>>,
    finished: Cache<Uuid, Arc<Record>>,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            live: DashMap::new(),
            finished: Cache::builder().time_to_live(retention).build(),
        }
    }

    fn record(&self, id: &Uuid) -> Option<Arc<Record>> {
        self.live
            .get(id)
            .map(|r| Arc::clone(&r))
            .or_else(|| self.finished.get(id))
    }

    pub fn insert(&self, query: Query, request: QueryRequest, cancel: CancelSignal) {
        let id = query.id;
        let (tx, _rx) = watch::channel(query);
        self.live.insert(
            id,
            Arc::new(Record {
                tx,
                request: Arc::new(request),
                cancel: Mutex::new(Some(cancel)),
                result: Mutex::new(None),
            }),
        );
    }

    pub fn snapshot(&self, id: &Uuid) -> Option<Query> {
        self.record(id).map(|r| r.tx.borrow().clone())
    }

    pub fn subscribe(&self, id: &Uuid) -> Option<watch::Receiver<Query>> {
        self.record(id).map(|r| r.tx.subscribe())
    }

    /// Apply `f`; watchers are notified only when it reports a change
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut Query) -> bool) -> bool {
        let Some(record) = self.record(id) else {
            return false;
        };
        let modified = record.tx.send_if_modified(f);
        if modified && record.tx.borrow().status.is_terminal() {
            self.retire(id, record);
        }
        modified
    }

    fn retire(&self, id: &Uuid, record: Arc<Record>) {
        record.cancel.lock().take();
        // Visible in `finished` before it leaves `live`
        self.finished.insert(*id, record);
        self.live.remove(id);
    }

    /// Returns false when the move is illegal, e.g. out of a terminal state
    pub fn transition(&self, id: &Uuid, next: QueryStatus) -> bool {
        self.update(id, |q| q.transition(next).is_ok())
    }

    pub fn request(&self, id: &Uuid) -> Option<Arc<QueryRequest>> {
        self.record(id).map(|r| Arc::clone(&r.request))
    }

    pub fn set_result(&self, id: Uuid, result: Arc<NormalizedResult>) {
        if let Some(record) = self.record(&id) {
            *record.result.lock() = Some(result);
        }
    }

    pub fn result(&self, id: &Uuid) -> Option<Arc<NormalizedResult>> {
        self.record(id).and_then(|r| r.result.lock().clone())
    }

    /// `None` once the query is terminal
    pub fn cancel_signal(&self, id: &Uuid) -> Option<CancelSignal> {
        self.record(id).and_then(|r| r.cancel.lock().clone())
    }

    /// Most recent query submitted with `client_id`
    pub fn find_by_client_id(&self, client_id: &str) -> Option<Query> {
        let live = self.live.iter().map(|entry| entry.value().tx.borrow().clone());
        let finished = self.finished.iter().map(|(_, record)| record.tx.borrow().clone());
        live.chain(finished)
            .filter(|q| q.client_id.as_deref() == Some(client_id))
            .max_by_key(|q| q.start_time)
    }

    /// Queries not yet terminal
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn len(&self) -> usize {
        self.finished.run_pending_tasks();
        self.live.len() + self.finished.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
