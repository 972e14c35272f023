//! Event normalization and filtering.
//!
//! Restricts raw feed records to the bounding region and a magnitude range,
//! orders them and truncates to a cap. Everything here is pure.

use std::cmp::Ordering;

use crate::models::SeismicEvent;

/// Fixed region the map covers: Mexico and the northern Central American arc.
pub const DEFAULT_REGION: BBox = BBox::new(14.0, -118.5, 33.0, -86.5);

/// Maximum events retained by the live map.
pub const LIVE_MAP_CAP: usize = 5000;

/// Maximum events kept by the strongest-of-year ranking.
pub const STRONGEST_CAP: usize = 20;

/// Magnitude window for the strongest-of-year ranking.
pub const STRONGEST_RANGE: MagnitudeRange = MagnitudeRange::between(2.8, 6.0);

/// Bounding box for geographic filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl std::str::FromStr for BBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(format!(
                "bbox requires 4 values (minlat,minlon,maxlat,maxlon), got {}",
                parts.len()
            ));
        }

        let vals: Result<Vec<f64>, _> = parts.iter().map(|p| p.trim().parse::<f64>()).collect();
        let vals = vals.map_err(|e| format!("invalid number in bbox: {e}"))?;

        let bbox = Self::new(vals[0], vals[1], vals[2], vals[3]);

        if !(-90.0..=90.0).contains(&bbox.min_lat) || !(-90.0..=90.0).contains(&bbox.max_lat) {
            return Err(format!(
                "latitudes {}..{} out of range [-90, 90]",
                bbox.min_lat, bbox.max_lat
            ));
        }
        if !(-180.0..=180.0).contains(&bbox.min_lon) || !(-180.0..=180.0).contains(&bbox.max_lon) {
            return Err(format!(
                "longitudes {}..{} out of range [-180, 180]",
                bbox.min_lon, bbox.max_lon
            ));
        }
        if bbox.min_lat > bbox.max_lat {
            return Err(format!(
                "min_lat {} must be <= max_lat {}",
                bbox.min_lat, bbox.max_lat
            ));
        }
        if bbox.min_lon > bbox.max_lon {
            return Err(format!(
                "min_lon {} must be <= max_lon {}",
                bbox.min_lon, bbox.max_lon
            ));
        }

        Ok(bbox)
    }
}

impl std::fmt::Display for BBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

impl BBox {
    #[must_use]
    pub const fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Check if a point is within the bounding box (edges inclusive).
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Geometric centre as (lat, lon).
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// Inclusive magnitude bounds. `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MagnitudeRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MagnitudeRange {
    #[must_use]
    pub const fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    #[must_use]
    pub const fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    #[must_use]
    pub fn contains(&self, magnitude: f64) -> bool {
        self.min.is_none_or(|min| magnitude >= min) && self.max.is_none_or(|max| magnitude <= max)
    }
}

/// Snapshot ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Descending by `occurred_at`
    NewestFirst,
    /// Descending by `magnitude`
    StrongestFirst,
}

/// Combined normalization criteria.
#[derive(Debug, Clone, Copy)]
pub struct Criteria {
    pub region: BBox,
    pub magnitude: MagnitudeRange,
    pub order: SortKey,
    pub cap: usize,
}

impl Criteria {
    /// Live map: minimum magnitude only, newest first.
    #[must_use]
    pub const fn live_map(region: BBox, min_magnitude: f64, cap: usize) -> Self {
        Self {
            region,
            magnitude: MagnitudeRange::at_least(min_magnitude),
            order: SortKey::NewestFirst,
            cap,
        }
    }

    /// Strongest of the year: [2.8, 6.0], strongest first, top 20.
    #[must_use]
    pub const fn strongest(region: BBox) -> Self {
        Self {
            region,
            magnitude: STRONGEST_RANGE,
            order: SortKey::StrongestFirst,
            cap: STRONGEST_CAP,
        }
    }

    /// Check if an event passes the region and magnitude criteria.
    #[must_use]
    pub fn matches(&self, event: &SeismicEvent) -> bool {
        self.region.contains(event.latitude, event.longitude)
            && self.magnitude.contains(event.magnitude)
    }

    fn compare(&self, a: &SeismicEvent, b: &SeismicEvent) -> Ordering {
        match self.order {
            SortKey::NewestFirst => b.occurred_at.cmp(&a.occurred_at),
            SortKey::StrongestFirst => b.magnitude.total_cmp(&a.magnitude),
        }
    }
}

/// Filter, order and truncate raw events into snapshot candidates.
///
/// The sort is stable: ties keep input order.
#[must_use]
pub fn normalize<I>(events: I, criteria: &Criteria) -> Vec<SeismicEvent>
where
    I: IntoIterator<Item = SeismicEvent>,
{
    let mut kept: Vec<SeismicEvent> = events
        .into_iter()
        .filter(|e| criteria.matches(e))
        .collect();

    kept.sort_by(|a, b| criteria.compare(a, b));
    kept.truncate(criteria.cap);
    kept
}
