//! One backend computation per fingerprint, shared by every query that wants it

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::CancelSignal;
use crate::cache::Fingerprint;

struct Entry<T: Clone> {
    generation: u64,
    future: Shared<BoxFuture<'static, T>>,
    participants: HashSet<Uuid>,
    cancel: CancelSignal,
    dispatched: bool,
}

pub struct Joined<T: Clone> {
    pub future: Shared<BoxFuture<'static, T>>,
    pub generation: u64,
    /// The backend call was already issued when this participant joined
    pub dispatched: bool,
    /// This participant started the computation
    pub leader: bool,
}

pub struct InFlight<T: Clone> {
    entries: Mutex<HashMap<Fingerprint, Entry<T>>>,
    generations: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> InFlight<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Join the computation for `key`, starting it with `start` if none is running
    pub fn join(
        &self,
        key: &Fingerprint,
        participant: Uuid,
        start: impl FnOnce(CancelSignal, u64) -> BoxFuture<'static, T>,
    ) -> Joined<T> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.participants.insert(participant);
            return Joined {
                future: entry.future.clone(),
                generation: entry.generation,
                dispatched: entry.dispatched,
                leader: false,
            };
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let cancel = CancelSignal::new();
        let future = start(cancel.clone(), generation).shared();
        entries.insert(
            key.clone(),
            Entry {
                generation,
                future: future.clone(),
                participants: HashSet::from([participant]),
                cancel,
                dispatched: false,
            },
        );
        Joined {
            future,
            generation,
            dispatched: false,
            leader: true,
        }
    }

    /// Drop a participant; the computation is cancelled once nobody waits on it
    pub fn leave(&self, key: &Fingerprint, generation: u64, participant: &Uuid) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.participants.remove(participant);
        if entry.participants.is_empty() {
            entry.cancel.cancel();
            entries.remove(key);
            tracing::debug!(fingerprint = %key, "Abandoned in-flight computation cancelled");
        }
    }

    /// Mark the backend call as issued; returns the current participants
    pub fn mark_dispatched(&self, key: &Fingerprint, generation: u64) -> Vec<Uuid> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.generation == generation => {
                entry.dispatched = true;
                entry.participants.iter().copied().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn participants(&self, key: &Fingerprint, generation: u64) -> Vec<Uuid> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.generation == generation => entry.participants.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Remove a finished computation so later requests go to the cache
    pub fn finish(&self, key: &Fingerprint, generation: u64) {
        let mut entries = self.entries.lock();
        if entries.get(key).map_or(false, |e| e.generation == generation) {
            entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> Default for InFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaves the computation when the participant stops waiting
pub struct Participation<T: Clone + Send + Sync + 'static> {
    pub inflight: Arc<InFlight<T>>,
    pub key: Fingerprint,
    pub generation: u64,
    pub participant: Uuid,
}

impl<T: Clone + Send + Sync + 'static> Drop for Participation<T> {
    fn drop(&mut self) {
        self.inflight.leave(&self.key, self.generation, &self.participant);
    }
}
