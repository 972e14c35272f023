//! Snapshot change detection.
//!
//! Decides whether a freshly normalized candidate differs from the held
//! snapshot. Equivalence is positional: same length and the same event ID at
//! every index. A reordering of the same events counts as a change.

use crate::models::SeismicEvent;
use crate::snapshot::EventSnapshot;

/// Position-sensitive identity comparison of two event sequences.
#[must_use]
pub fn is_equivalent(previous: &[SeismicEvent], candidate: &[SeismicEvent]) -> bool {
    previous.len() == candidate.len()
        && previous
            .iter()
            .zip(candidate)
            .all(|(a, b)| a.event_id == b.event_id)
}

/// Result of comparing a candidate against the held snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// Candidate is equivalent; the held snapshot was kept as is
    Unchanged,
    /// Candidate differs and replaced the snapshot
    Replaced,
}

impl ChangeOutcome {
    /// Check if observers need to re-render.
    #[must_use]
    pub fn should_render(self) -> bool {
        matches!(self, Self::Replaced)
    }
}

/// Applies candidates to a snapshot and tracks how often they change.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    /// Last generation handed out
    generation: u64,
    /// Total candidates compared (for stats)
    total_checked: u64,
    /// Total candidates that replaced the snapshot
    total_replaced: u64,
}

impl ChangeDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `current` with `candidate` unless they are equivalent.
    ///
    /// On `Unchanged` the existing snapshot (and its shared storage) is left
    /// untouched.
    pub fn apply(&mut self, current: &mut EventSnapshot, candidate: Vec<SeismicEvent>) -> ChangeOutcome {
        self.total_checked += 1;

        if is_equivalent(current.events(), &candidate) {
            return ChangeOutcome::Unchanged;
        }

        self.generation = self.generation.max(current.generation()) + 1;
        *current = EventSnapshot::new(candidate, self.generation);
        self.total_replaced += 1;
        ChangeOutcome::Replaced
    }

    /// Get total candidates compared.
    #[must_use]
    pub fn total_checked(&self) -> u64 {
        self.total_checked
    }

    /// Get total snapshot replacements.
    #[must_use]
    pub fn total_replaced(&self) -> u64 {
        self.total_replaced
    }

    /// Fraction of candidates that changed the snapshot (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn change_rate(&self) -> f64 {
        if self.total_checked == 0 {
            0.0
        } else {
            self.total_replaced as f64 / self.total_checked as f64
        }
    }
}
