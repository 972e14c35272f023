//! Data models for the FDSN GeoJSON event feed.
//!
//! Wire structures mirror the GeoJSON returned by the USGS `fdsnws/event/1/query`
//! endpoint with `format=geojson`. Everything downstream of the client works on
//! the normalized [`SeismicEvent`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SismicError;

/// Top-level GeoJSON response.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureCollection {
    /// Always "FeatureCollection"
    #[serde(rename = "type")]
    pub type_: String,

    /// Feed metadata (absent on some mirrors)
    #[serde(default)]
    pub metadata: Option<Metadata>,

    /// Earthquake events
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Validate the response structure.
    pub fn validate(&self) -> Result<(), SismicError> {
        if self.type_ != "FeatureCollection" {
            return Err(SismicError::InvalidResponse(format!(
                "expected type 'FeatureCollection', got '{}'",
                self.type_
            )));
        }
        Ok(())
    }

    /// Normalize every usable feature, in feed order.
    ///
    /// Features that cannot be normalized are skipped, never fatal.
    #[must_use]
    pub fn into_events(self) -> Vec<SeismicEvent> {
        let total = self.features.len();
        let events: Vec<SeismicEvent> = self
            .features
            .iter()
            .filter_map(|f| match SeismicEvent::try_from(f) {
                Ok(event) => Some(event),
                Err(e) => {
                    debug!("skipping feature: {e}");
                    None
                }
            })
            .collect();

        if events.len() != total {
            debug!("normalized {} of {} features", events.len(), total);
        }
        events
    }
}

/// Metadata about the feed response.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    /// Number of events in response
    #[serde(default)]
    pub count: Option<usize>,
}

/// A single earthquake record as delivered by the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct Feature {
    /// Feed-level event ID
    #[serde(default)]
    pub id: Option<String>,

    /// Geographic location
    #[serde(default)]
    pub geometry: Option<Geometry>,

    /// Event properties
    pub properties: Properties,
}

/// Point geometry for an event.
#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    /// Coordinates: [longitude, latitude, depth_km]
    pub coordinates: Vec<f64>,
}

/// Event properties.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Properties {
    /// Magnitude value
    pub mag: Option<f64>,

    /// Magnitude type (mb, ml, mw, ...)
    #[serde(rename = "magType", default)]
    pub mag_type: Option<String>,

    /// Human-readable place description
    #[serde(default)]
    pub place: Option<String>,

    /// Event time (ms since epoch)
    #[serde(default)]
    pub time: Option<i64>,

    /// Explicit event identity, preferred over the feature ID when present
    #[serde(rename = "eventId", default)]
    pub event_id: Option<String>,

    /// Event page URL
    #[serde(default)]
    pub url: Option<String>,
}

/// A normalized seismic event.
///
/// Immutable once built; snapshots hold these and replace them wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeismicEvent {
    pub event_id: String,
    pub place: String,
    pub magnitude: f64,
    pub magnitude_type: Option<String>,
    pub depth_km: f64,
    pub occurred_at: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    pub url: Option<String>,
}

impl TryFrom<&Feature> for SeismicEvent {
    type Error = SismicError;

    fn try_from(f: &Feature) -> Result<Self, Self::Error> {
        let event_id = f
            .properties
            .event_id
            .as_deref()
            .or(f.id.as_deref())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SismicError::Validation("missing event ID".into()))?
            .to_string();

        let magnitude = f
            .properties
            .mag
            .ok_or_else(|| SismicError::Validation(format!("{event_id}: missing magnitude")))?;

        let occurred_at = f
            .properties
            .time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| SismicError::Validation(format!("{event_id}: missing or invalid time")))?;

        let coords = f
            .geometry
            .as_ref()
            .map(|g| g.coordinates.as_slice())
            .unwrap_or_default();
        if coords.len() < 2 {
            return Err(SismicError::Validation(format!(
                "{event_id}: expected at least 2 coordinates, got {}",
                coords.len()
            )));
        }

        Ok(Self {
            event_id,
            place: f
                .properties
                .place
                .clone()
                .unwrap_or_else(|| "Unknown location".into()),
            magnitude,
            magnitude_type: f.properties.mag_type.clone(),
            depth_km: coords.get(2).copied().unwrap_or(0.0),
            occurred_at,
            longitude: coords[0],
            latitude: coords[1],
            url: f.properties.url.clone(),
        })
    }
}
