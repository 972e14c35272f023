//! Strongest-of-year ranking.
//!
//! Independent of the live map: ranks a separately fetched year-to-date set by
//! magnitude and announces the top event whenever the ranked list changes.
//! Announcements go out on a channel after the list has been published, so
//! listeners never run inside the derivation.

use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::diff::{ChangeDetector, ChangeOutcome};
use crate::filters::{BBox, Criteria, normalize};
use crate::models::SeismicEvent;
use crate::snapshot::EventSnapshot;

/// Emitted when the ranked list changes and is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct StrongestChanged {
    /// The new top-ranked event
    pub event: SeismicEvent,
    /// Generation of the ranked list it came from
    pub generation: u64,
}

/// Ranks candidates and tracks the published top list.
#[derive(Debug)]
pub struct RankingEngine {
    criteria: Criteria,
    top: watch::Sender<EventSnapshot>,
    detector: Mutex<ChangeDetector>,
    notify: mpsc::UnboundedSender<StrongestChanged>,
}

impl RankingEngine {
    /// Create an engine for `region` and the receiving end of its announcements.
    #[must_use]
    pub fn new(region: BBox) -> (Self, mpsc::UnboundedReceiver<StrongestChanged>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let engine = Self {
            criteria: Criteria::strongest(region),
            top: watch::Sender::new(EventSnapshot::default()),
            detector: Mutex::new(ChangeDetector::new()),
            notify,
        };
        (engine, rx)
    }

    /// Filter to [2.8, 6.0], order by magnitude, keep the top 20.
    #[must_use]
    pub fn rank(&self, events: Vec<SeismicEvent>) -> Vec<SeismicEvent> {
        normalize(events, &self.criteria)
    }

    /// Rank `events` and publish the result if it differs from the current list.
    pub fn update(&self, events: Vec<SeismicEvent>) -> ChangeOutcome {
        let ranked = self.rank(events);
        let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);

        let mut outcome = ChangeOutcome::Unchanged;
        let mut announcement = None;
        self.top.send_if_modified(|current| {
            outcome = detector.apply(current, ranked);
            if outcome.should_render() {
                announcement = current.events().first().cloned().map(|event| StrongestChanged {
                    event,
                    generation: current.generation(),
                });
            }
            outcome.should_render()
        });
        drop(detector);

        if let Some(change) = announcement {
            info!(
                event_id = %change.event.event_id,
                magnitude = change.event.magnitude,
                "strongest event of the year changed"
            );
            if self.notify.send(change).is_err() {
                debug!("no listener for strongest-event changes");
            }
        }
        outcome
    }

    /// Current ranked list.
    #[must_use]
    pub fn top(&self) -> EventSnapshot {
        self.top.borrow().clone()
    }

    #[must_use]
    pub fn strongest(&self) -> Option<SeismicEvent> {
        self.top.borrow().events().first().cloned()
    }
}
