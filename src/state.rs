//! Live map state.
//!
//! Owns the current snapshot, the selection and the map renderer, and guards
//! commits with a request sequence so a late response can never overwrite a
//! newer one. Observers follow changes through watch channels.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::diff::{ChangeDetector, ChangeOutcome};
use crate::errors::SismicError;
use crate::filters::BBox;
use crate::legend::{self, LegendEntry};
use crate::models::SeismicEvent;
use crate::render::{MapRenderer, Marker, ViewState};
use crate::selection::Selection;
use crate::snapshot::EventSnapshot;

/// Where the polling cycle currently is.
///
/// `Unchanged`, `Replaced`, `Stale` and `Failed` are the transient outcome of
/// a cycle; the poller settles the phase back to `Idle` afterwards and the
/// outcome stays readable as [`MapStatus::last_outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Idle,
    Fetching,
    Unchanged,
    Replaced,
    /// The response was older than one already applied and was dropped
    Stale,
    Failed,
    Stopped,
}

/// Result of offering a fetched candidate to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A newer request was already applied; the candidate was dropped
    Stale,
    Unchanged,
    Replaced,
}

/// Point-in-time summary for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MapStatus {
    pub phase: PollPhase,
    /// Outcome of the most recent finished cycle, if any
    pub last_outcome: Option<PollPhase>,
    pub loading: bool,
    pub generation: u64,
    pub events: usize,
    pub selected: Option<String>,
    pub checked: u64,
    pub replaced: u64,
    pub renders: u64,
}

#[derive(Debug, Default)]
struct Sequence {
    issued: u64,
    applied: u64,
}

/// Shared state behind the live map.
#[derive(Debug)]
pub struct LiveMap {
    clear_stale_selection: bool,
    snapshot: watch::Sender<EventSnapshot>,
    selection: watch::Sender<Selection>,
    loading: watch::Sender<bool>,
    phase: watch::Sender<PollPhase>,
    last_outcome: watch::Sender<Option<PollPhase>>,
    sequence: Mutex<Sequence>,
    detector: Mutex<ChangeDetector>,
    renderer: Mutex<MapRenderer>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LiveMap {
    /// Create an empty map over `region`.
    ///
    /// With `clear_stale_selection` a snapshot replace drops a selection whose
    /// event is no longer present; otherwise the stale ID is kept.
    #[must_use]
    pub fn new(region: &BBox, clear_stale_selection: bool) -> Self {
        Self {
            clear_stale_selection,
            snapshot: watch::Sender::new(EventSnapshot::default()),
            selection: watch::Sender::new(Selection::default()),
            loading: watch::Sender::new(false),
            phase: watch::Sender::new(PollPhase::Idle),
            last_outcome: watch::Sender::new(None),
            sequence: Mutex::new(Sequence::default()),
            detector: Mutex::new(ChangeDetector::new()),
            renderer: Mutex::new(MapRenderer::new(region)),
        }
    }

    /// Start a fetch cycle and return its sequence number.
    pub fn begin_fetch(&self) -> u64 {
        let seq = {
            let mut sequence = lock(&self.sequence);
            sequence.issued += 1;
            sequence.issued
        };
        self.phase.send_replace(PollPhase::Fetching);
        self.loading.send_replace(true);
        seq
    }

    /// Offer the normalized result of fetch `seq`.
    pub fn commit(&self, seq: u64, candidate: Vec<SeismicEvent>) -> CommitOutcome {
        {
            let mut sequence = lock(&self.sequence);
            if seq <= sequence.applied {
                warn!(seq, applied = sequence.applied, "discarding stale response");
                self.last_outcome.send_replace(Some(PollPhase::Stale));
                return CommitOutcome::Stale;
            }
            sequence.applied = seq;
        }

        let mut outcome = ChangeOutcome::Unchanged;
        let change_rate = {
            let mut detector = lock(&self.detector);
            self.snapshot.send_if_modified(|current| {
                outcome = detector.apply(current, candidate);
                outcome.should_render()
            });
            detector.change_rate()
        };
        self.loading.send_replace(false);

        match outcome {
            ChangeOutcome::Unchanged => {
                debug!(seq, change_rate, "snapshot unchanged");
                self.record(PollPhase::Unchanged);
                CommitOutcome::Unchanged
            }
            ChangeOutcome::Replaced => {
                let snapshot = self.snapshot();
                info!(
                    seq,
                    generation = snapshot.generation(),
                    events = snapshot.len(),
                    "snapshot replaced"
                );
                if self.clear_stale_selection
                    && self.selection.send_if_modified(|sel| sel.retain_in(&snapshot))
                {
                    info!("cleared selection that left the snapshot");
                    self.refocus(&snapshot);
                }
                self.record(PollPhase::Replaced);
                CommitOutcome::Replaced
            }
        }
    }

    /// Record a failed fetch; the current snapshot stays as it is.
    pub fn fail(&self, seq: u64, error: &SismicError) {
        let kind = if error.is_network() {
            "network"
        } else if error.is_parse() {
            "parse"
        } else {
            "other"
        };
        warn!(seq, kind, "feed fetch failed, keeping previous snapshot: {error}");
        self.loading.send_replace(false);
        self.record(PollPhase::Failed);
    }

    fn record(&self, outcome: PollPhase) {
        self.phase.send_replace(outcome);
        self.last_outcome.send_replace(Some(outcome));
    }

    /// End of cycle `seq`: back to `Idle` unless a newer fetch already began
    /// or polling was stopped.
    pub fn settle(&self, seq: u64) {
        if lock(&self.sequence).issued != seq {
            return;
        }
        self.phase.send_if_modified(|phase| {
            if matches!(phase, PollPhase::Fetching | PollPhase::Stopped | PollPhase::Idle) {
                return false;
            }
            *phase = PollPhase::Idle;
            true
        });
    }

    /// Mark polling as torn down.
    pub fn stop(&self) {
        self.loading.send_replace(false);
        self.phase.send_replace(PollPhase::Stopped);
    }

    #[must_use]
    pub fn snapshot(&self) -> EventSnapshot {
        self.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn selection(&self) -> Selection {
        self.selection.borrow().clone()
    }

    /// Focus on `event_id` if it is in the current snapshot.
    pub fn select(&self, event_id: &str) -> Option<SeismicEvent> {
        let snapshot = self.snapshot();
        let event = snapshot.get(event_id)?.clone();

        if self.selection.send_if_modified(|sel| sel.select(event_id)) {
            debug!(event_id, "selection changed");
        }
        self.refocus(&snapshot);
        Some(event)
    }

    /// Returns whether anything was selected.
    pub fn clear_selection(&self) -> bool {
        let cleared = self.selection.send_if_modified(Selection::clear);
        self.refocus(&self.snapshot());
        cleared
    }

    fn refocus(&self, snapshot: &EventSnapshot) {
        let selection = self.selection();
        if let Some(view) = lock(&self.renderer).focus(snapshot, &selection) {
            debug!(lat = view.latitude, lon = view.longitude, "view recentered");
        }
    }

    #[must_use]
    pub fn markers(&self) -> Arc<[Marker]> {
        let snapshot = self.snapshot();
        let selection = self.selection();
        lock(&self.renderer).markers(&snapshot, &selection)
    }

    #[must_use]
    pub fn legend(&self, limit: usize) -> Vec<LegendEntry> {
        legend::entries(&self.snapshot(), &self.selection(), limit)
    }

    #[must_use]
    pub fn view(&self) -> ViewState {
        lock(&self.renderer).view()
    }

    #[must_use]
    pub fn status(&self) -> MapStatus {
        let snapshot = self.snapshot();
        let renders = lock(&self.renderer).renders();
        let detector = lock(&self.detector);
        MapStatus {
            phase: *self.phase.borrow(),
            last_outcome: *self.last_outcome.borrow(),
            loading: *self.loading.borrow(),
            generation: snapshot.generation(),
            events: snapshot.len(),
            selected: self.selection().event_id().map(str::to_string),
            checked: detector.total_checked(),
            replaced: detector.total_replaced(),
            renders,
        }
    }

    #[must_use]
    pub fn subscribe_snapshot(&self) -> watch::Receiver<EventSnapshot> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::DEFAULT_REGION;
    use crate::legend::LEGEND_LEN;
    use crate::models::testing::event;
    use crate::render::FOCUS_ZOOM;

    fn three() -> Vec<SeismicEvent> {
        vec![
            event("c", 5.0, 19.0, -99.0, 2),
            event("b", 2.0, 17.0, -96.0, 1),
            event("a", 4.1, 16.0, -95.0, 0),
        ]
    }

    #[test]
    fn test_identical_fetches_keep_snapshot() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let seq = map.begin_fetch();
        assert_eq!(map.commit(seq, three()), CommitOutcome::Replaced);
        let held = map.snapshot();

        let mut sub = map.subscribe_snapshot();
        sub.mark_unchanged();

        let seq = map.begin_fetch();
        assert_eq!(map.commit(seq, three()), CommitOutcome::Unchanged);
        assert!(map.snapshot().ptr_eq(&held));
        assert!(!sub.has_changed().unwrap());
        assert_eq!(map.status().phase, PollPhase::Unchanged);
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let older = map.begin_fetch();
        let newer = map.begin_fetch();

        assert_eq!(map.commit(newer, three()), CommitOutcome::Replaced);
        assert_eq!(
            map.commit(older, vec![event("old", 3.0, 19.0, -99.0, 0)]),
            CommitOutcome::Stale
        );
        assert_eq!(map.snapshot().len(), 3);
    }

    #[test]
    fn test_failure_keeps_snapshot() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let seq = map.begin_fetch();
        map.commit(seq, three());

        let seq = map.begin_fetch();
        assert!(map.status().loading);
        map.fail(
            seq,
            &SismicError::Api {
                status: 500,
                message: String::new(),
            },
        );

        let status = map.status();
        assert_eq!(status.phase, PollPhase::Failed);
        assert!(!status.loading);
        assert_eq!(status.events, 3);
    }

    #[test]
    fn test_select_from_legend_and_recenter() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let seq = map.begin_fetch();
        map.commit(seq, three());

        let legend = map.legend(LEGEND_LEN);
        let picked = map.select(&legend[1].event_id).expect("entry resolves");
        assert_eq!(picked.event_id, "b");
        assert_eq!(map.selection().event_id(), Some("b"));

        let view = map.view();
        assert!((view.latitude - 17.0).abs() < 1e-9);
        assert_eq!(view.zoom, FOCUS_ZOOM);

        let markers = map.markers();
        let selected: Vec<&str> = markers
            .iter()
            .filter(|m| m.selected)
            .map(|m| m.event_id.as_str())
            .collect();
        assert_eq!(selected, ["b"]);

        assert!(map.select("missing").is_none());
        assert_eq!(map.selection().event_id(), Some("b"));

        assert!(map.clear_selection());
        assert!(map.markers().iter().all(|m| !m.selected));
    }

    #[test]
    fn test_stale_selection_kept_by_default() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let seq = map.begin_fetch();
        map.commit(seq, three());
        map.select("a");

        let seq = map.begin_fetch();
        map.commit(seq, vec![event("z", 3.0, 19.0, -99.0, 9)]);
        assert_eq!(map.selection().event_id(), Some("a"));
        assert!(map.markers().iter().all(|m| !m.selected));
    }

    #[test]
    fn test_stale_selection_cleared_when_enabled() {
        let map = LiveMap::new(&DEFAULT_REGION, true);
        let seq = map.begin_fetch();
        map.commit(seq, three());
        map.select("a");

        let seq = map.begin_fetch();
        map.commit(seq, vec![event("z", 3.0, 19.0, -99.0, 9)]);
        assert_eq!(map.selection().event_id(), None);
    }

    #[test]
    fn test_settle_returns_to_idle() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        assert_eq!(map.status().last_outcome, None);

        let seq = map.begin_fetch();
        map.commit(seq, three());
        map.settle(seq);
        let status = map.status();
        assert_eq!(status.phase, PollPhase::Idle);
        assert_eq!(status.last_outcome, Some(PollPhase::Replaced));

        // a cycle that was overtaken leaves the newer fetch alone
        let older = map.begin_fetch();
        let _newer = map.begin_fetch();
        map.settle(older);
        assert_eq!(map.status().phase, PollPhase::Fetching);

        map.stop();
        map.settle(older);
        assert_eq!(map.status().phase, PollPhase::Stopped);
    }

    #[test]
    fn test_cleared_selection_recenters_when_reselected() {
        let map = LiveMap::new(&DEFAULT_REGION, true);
        let seq = map.begin_fetch();
        map.commit(seq, three());
        map.select("a");
        assert!((map.view().latitude - 16.0).abs() < 1e-9);

        let seq = map.begin_fetch();
        map.commit(seq, vec![event("z", 3.0, 19.0, -99.0, 9)]);
        assert_eq!(map.selection().event_id(), None);

        // the same event comes back relocated
        let seq = map.begin_fetch();
        map.commit(seq, vec![event("a", 4.1, 18.0, -97.0, 0)]);
        assert!(map.select("a").is_some());

        let view = map.view();
        assert!((view.latitude - 18.0).abs() < 1e-9);
        assert!((view.longitude - (-97.0)).abs() < 1e-9);
    }

    #[test]
    fn test_markers_memoized_across_unchanged_polls() {
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let seq = map.begin_fetch();
        map.commit(seq, three());
        let first = map.markers();

        let seq = map.begin_fetch();
        map.commit(seq, three());
        assert!(Arc::ptr_eq(&first, &map.markers()));
        assert_eq!(map.status().renders, 1);
    }
}
