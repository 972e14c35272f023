//! FDSN event feed client.
//!
//! Issues a single GeoJSON query per call against an FDSN `event/1/query`
//! endpoint (USGS by default). No retries: callers keep their previous
//! snapshot on failure and try again on the next poll.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::errors::SismicError;
use crate::filters::{BBox, MagnitudeRange, STRONGEST_RANGE};
use crate::models::{FeatureCollection, SeismicEvent};

/// Default request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// User agent string for API requests.
const USER_AGENT: &str = concat!("sismicmap/", env!("CARGO_PKG_VERSION"));

/// USGS FDSN event query endpoint.
pub const FDSN_QUERY_URL: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";

/// Parameters of one feed request.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub magnitude: MagnitudeRange,
    pub region: BBox,
    pub limit: Option<usize>,
}

impl FeedQuery {
    /// Trailing window ending at `now` for the live map.
    ///
    /// A negative or unrepresentable `lookback` collapses to an empty window
    /// at `now`.
    #[must_use]
    pub fn live_window(
        now: DateTime<Utc>,
        lookback: chrono::Duration,
        min_magnitude: f64,
        region: BBox,
        cap: usize,
    ) -> Self {
        let start = now
            .checked_sub_signed(lookback)
            .filter(|start| *start <= now)
            .unwrap_or(now);
        Self {
            start,
            end: now,
            magnitude: MagnitudeRange::at_least(min_magnitude),
            region,
            limit: Some(cap),
        }
    }

    /// January 1st of the current year up to `now`, within the ranking range.
    #[must_use]
    pub fn year_to_date(now: DateTime<Utc>, region: BBox) -> Self {
        let start = Utc
            .with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        Self {
            start,
            end: now,
            magnitude: STRONGEST_RANGE,
            region,
            limit: None,
        }
    }

    /// Query string pairs in FDSN parameter names.
    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("format", "geojson".to_string()),
            ("starttime", self.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("endtime", self.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("minlatitude", self.region.min_lat.to_string()),
            ("maxlatitude", self.region.max_lat.to_string()),
            ("minlongitude", self.region.min_lon.to_string()),
            ("maxlongitude", self.region.max_lon.to_string()),
        ];
        if let Some(min) = self.magnitude.min {
            params.push(("minmagnitude", min.to_string()));
        }
        if let Some(max) = self.magnitude.max {
            params.push(("maxmagnitude", max.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        params
    }
}

/// Anything that can answer a [`FeedQuery`] with raw, unfiltered events.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<SeismicEvent>, SismicError>;
}

/// Decode a GeoJSON body into events.
///
/// An empty body is an empty result, not an error.
pub fn parse_feed(body: &str) -> Result<Vec<SeismicEvent>, SismicError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let feed: FeatureCollection = serde_json::from_str(body)?;
    feed.validate()?;

    if let Some(count) = feed.metadata.as_ref().and_then(|m| m.count) {
        if count != feed.features.len() {
            debug!(count, received = feed.features.len(), "feed count mismatch");
        }
    }
    Ok(feed.into_events())
}

/// HTTP client for an FDSN event endpoint.
pub struct FdsnClient {
    client: Client,
    endpoint: String,
}

impl FdsnClient {
    /// Create a client for the USGS endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self, SismicError> {
        Self::with_endpoint(FDSN_QUERY_URL)
    }

    /// Create a client for a specific query URL (mirrors, local fixtures).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, SismicError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSource for FdsnClient {
    #[instrument(skip(self, query), fields(start = %query.start, end = %query.end))]
    async fn fetch(&self, query: &FeedQuery) -> Result<Vec<SeismicEvent>, SismicError> {
        debug!("querying {}", self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query.params())
            .send()
            .await?;

        // FDSN answers 204 when nothing matched
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!("no events matched");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SismicError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = response.text().await?;
        let events = parse_feed(&body)?;

        debug!("fetched {} events", events.len());
        Ok(events)
    }
}
