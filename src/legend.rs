//! Recent-events legend.
//!
//! A pure projection of the head of the live snapshot; clicking an entry
//! selects it by identity.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::selection::Selection;
use crate::snapshot::EventSnapshot;

/// Number of entries shown.
pub const LEGEND_LEN: usize = 20;

/// One clickable row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    pub event_id: String,
    pub place: String,
    pub magnitude: f64,
    pub occurred_at: DateTime<Utc>,
    pub selected: bool,
}

/// First `limit` events of the snapshot, in snapshot order.
#[must_use]
pub fn entries(snapshot: &EventSnapshot, selection: &Selection, limit: usize) -> Vec<LegendEntry> {
    snapshot
        .head(limit)
        .iter()
        .map(|e| LegendEntry {
            event_id: e.event_id.clone(),
            place: e.place.clone(),
            magnitude: e.magnitude,
            occurred_at: e.occurred_at,
            selected: selection.is_selected(&e.event_id),
        })
        .collect()
}
