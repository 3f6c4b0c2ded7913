//! Transaction event plumbing
//!
//! Mutations don't touch the lookup cache directly; they record events
//! into a per-unit-of-work accumulator. At commit the accumulated
//! events fire the cache's invalidation callbacks exactly once each;
//! at rollback the cache is cleared outright, since it is
//! transaction-unaware at the entry level and cannot undo speculative
//! inserts selectively.

use crate::lookup::LookupCache;
use parking_lot::Mutex;
use tracing::debug;

/// A store-level event produced by a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Content or structure written in the named store
    Write(String),
    /// A name removed in the named store
    Delete(String),
    /// The named store was snapshotted
    Snapshot(String),
}

/// Accumulates events for the current unit of work
pub struct EventRecorder {
    events: Mutex<Vec<StoreEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        EventRecorder {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Record an event for the commit phase
    pub fn record(&self, event: StoreEvent) {
        self.events.lock().push(event);
    }

    /// Commit: fire each distinct event against the cache, in first
    /// occurrence order, then clear the accumulator.
    pub fn commit(&self, cache: &LookupCache) {
        let mut events = self.events.lock();
        let mut fired: Vec<StoreEvent> = Vec::new();
        for event in events.drain(..) {
            if fired.contains(&event) {
                continue;
            }
            debug!(?event, "firing commit event");
            match &event {
                StoreEvent::Write(store) => cache.on_write(store),
                StoreEvent::Delete(store) => cache.on_delete(store),
                StoreEvent::Snapshot(store) => cache.on_snapshot(store),
            }
            fired.push(event);
        }
    }

    /// Rollback: discard pending events and clear the cache.
    pub fn rollback(&self, cache: &LookupCache) {
        self.events.lock().clear();
        cache.reset();
    }

    /// Number of pending events
    pub fn pending(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}
