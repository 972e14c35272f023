//! Immutable event snapshots.

use std::sync::Arc;

use crate::models::SeismicEvent;

/// One fetch cycle's result, replaced wholesale and never mutated.
///
/// Cloning is cheap; clones share the same event slice, so
/// [`EventSnapshot::ptr_eq`] tells whether two handles are the same snapshot.
#[derive(Debug, Clone)]
pub struct EventSnapshot {
    events: Arc<[SeismicEvent]>,
    generation: u64,
}

impl Default for EventSnapshot {
    fn default() -> Self {
        Self::new(Vec::new(), 0)
    }
}

impl EventSnapshot {
    #[must_use]
    pub fn new(events: Vec<SeismicEvent>, generation: u64) -> Self {
        Self {
            events: events.into(),
            generation,
        }
    }

    #[must_use]
    pub fn events(&self) -> &[SeismicEvent] {
        &self.events
    }

    /// Monotonic counter bumped on every replace; 0 is the initial empty snapshot.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Look up an event by identity.
    #[must_use]
    pub fn get(&self, event_id: &str) -> Option<&SeismicEvent> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.get(event_id).is_some()
    }

    /// The first `n` events in snapshot order.
    #[must_use]
    pub fn head(&self, n: usize) -> &[SeismicEvent] {
        &self.events[..n.min(self.events.len())]
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.events, &other.events)
    }
}
