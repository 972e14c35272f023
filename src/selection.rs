//! The focused event, held by identity only.

use crate::models::SeismicEvent;
use crate::snapshot::EventSnapshot;

/// At most one selected event ID.
///
/// Does not own the event; [`Selection::resolve`] looks it up in whatever
/// snapshot is current and yields `None` once the ID has dropped out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection(Option<String>);

impl Selection {
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn is_selected(&self, event_id: &str) -> bool {
        self.0.as_deref() == Some(event_id)
    }

    /// Focus on `event_id`. Returns whether the selection changed.
    pub fn select(&mut self, event_id: &str) -> bool {
        if self.is_selected(event_id) {
            return false;
        }
        self.0 = Some(event_id.to_string());
        true
    }

    /// Returns whether anything was selected.
    pub fn clear(&mut self) -> bool {
        self.0.take().is_some()
    }

    #[must_use]
    pub fn resolve<'a>(&self, snapshot: &'a EventSnapshot) -> Option<&'a SeismicEvent> {
        self.0.as_deref().and_then(|id| snapshot.get(id))
    }

    /// Drop the selection if it no longer resolves. Returns whether it was dropped.
    pub fn retain_in(&mut self, snapshot: &EventSnapshot) -> bool {
        match self.0.as_deref() {
            Some(id) if !snapshot.contains(id) => self.clear(),
            _ => false,
        }
    }
}
