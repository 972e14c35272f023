//! Map marker rendering.
//!
//! Turns the current snapshot and selection into circle markers sized by
//! magnitude, and tracks the map view so it recenters when the selection moves.
//! Marker sets can reach the live-map cap, so they are memoized on snapshot
//! and selection identity.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::filters::BBox;
use crate::selection::Selection;
use crate::snapshot::EventSnapshot;

/// Upper bound on an unselected marker radius, in map units (metres).
pub const MAX_RADIUS: f64 = 500.0;

/// Radius multiplier applied to the selected event.
pub const SELECTED_RADIUS_FACTOR: f64 = 30.0;

/// Zoom used for the initial region overview.
pub const OVERVIEW_ZOOM: u8 = 5;

/// Zoom used when flying to a selected event.
pub const FOCUS_ZOOM: u8 = 8;

/// Stroke and fill parameters for a circle marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerStyle {
    pub color: &'static str,
    pub fill_color: &'static str,
    pub fill_opacity: f64,
    pub weight: f64,
}

pub const DEFAULT_STYLE: MarkerStyle = MarkerStyle {
    color: "#3388ff",
    fill_color: "#3388ff",
    fill_opacity: 0.2,
    weight: 1.0,
};

pub const SELECTED_STYLE: MarkerStyle = MarkerStyle {
    color: "#d62728",
    fill_color: "#ff7f0e",
    fill_opacity: 0.6,
    weight: 3.0,
};

/// Radius for an event: `min(500, magnitude / 10 * 500)`, times 30 when selected.
#[must_use]
pub fn marker_radius(magnitude: f64, selected: bool) -> f64 {
    let base = (magnitude / 10.0 * MAX_RADIUS).clamp(0.0, MAX_RADIUS);
    if selected {
        base * SELECTED_RADIUS_FACTOR
    } else {
        base
    }
}

/// One drawable circle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub event_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: f64,
    pub place: String,
    pub radius: f64,
    pub selected: bool,
    #[serde(flatten)]
    pub style: MarkerStyle,
}

/// Map camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewState {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: u8,
    /// Whether the host should animate the transition
    pub animate: bool,
}

impl ViewState {
    /// Static overview of the whole region.
    #[must_use]
    pub fn overview(region: &BBox) -> Self {
        let (latitude, longitude) = region.center();
        Self {
            latitude,
            longitude,
            zoom: OVERVIEW_ZOOM,
            animate: false,
        }
    }
}

/// Build markers for every event in the snapshot.
#[must_use]
pub fn build_markers(snapshot: &EventSnapshot, selection: &Selection) -> Vec<Marker> {
    snapshot
        .events()
        .iter()
        .map(|e| {
            let selected = selection.is_selected(&e.event_id);
            Marker {
                event_id: e.event_id.clone(),
                latitude: e.latitude,
                longitude: e.longitude,
                magnitude: e.magnitude,
                place: e.place.clone(),
                radius: marker_radius(e.magnitude, selected),
                selected,
                style: if selected { SELECTED_STYLE } else { DEFAULT_STYLE },
            }
        })
        .collect()
}

/// Memoizing renderer plus view tracking.
#[derive(Debug)]
pub struct MapRenderer {
    cached: Option<Cached>,
    renders: u64,
    view: ViewState,
    focused: Option<String>,
}

#[derive(Debug)]
struct Cached {
    snapshot: EventSnapshot,
    selected: Option<String>,
    markers: Arc<[Marker]>,
}

impl MapRenderer {
    #[must_use]
    pub fn new(region: &BBox) -> Self {
        Self {
            cached: None,
            renders: 0,
            view: ViewState::overview(region),
            focused: None,
        }
    }

    /// Markers for the given state, rebuilt only when snapshot or selection identity changed.
    pub fn markers(&mut self, snapshot: &EventSnapshot, selection: &Selection) -> Arc<[Marker]> {
        let hit = self.cached.as_ref().filter(|c| {
            c.snapshot.ptr_eq(snapshot) && c.selected.as_deref() == selection.event_id()
        });
        if let Some(cached) = hit {
            return Arc::clone(&cached.markers);
        }

        let markers: Arc<[Marker]> = build_markers(snapshot, selection).into();
        self.renders += 1;
        debug!(
            generation = snapshot.generation(),
            markers = markers.len(),
            "rebuilt markers"
        );

        self.cached = Some(Cached {
            snapshot: snapshot.clone(),
            selected: selection.event_id().map(str::to_string),
            markers: Arc::clone(&markers),
        });
        markers
    }

    /// Recenter on the selected event if the selection moved.
    ///
    /// Returns the new view when it changed. Clearing the selection, or a
    /// selection that does not resolve, keeps the current view.
    pub fn focus(&mut self, snapshot: &EventSnapshot, selection: &Selection) -> Option<ViewState> {
        if self.focused.as_deref() == selection.event_id() {
            return None;
        }
        self.focused = selection.event_id().map(str::to_string);

        let event = selection.resolve(snapshot)?;
        self.view = ViewState {
            latitude: event.latitude,
            longitude: event.longitude,
            zoom: FOCUS_ZOOM,
            animate: true,
        };
        Some(self.view)
    }

    #[must_use]
    pub fn view(&self) -> ViewState {
        self.view
    }

    /// Number of marker rebuilds so far.
    #[must_use]
    pub fn renders(&self) -> u64 {
        self.renders
    }
}
