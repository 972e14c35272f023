//! Error types for sismicmap.
//!
//! Uses `thiserror` for library-style error definitions.

use thiserror::Error;

/// Errors that can occur while fetching or decoding the seismic feed.
#[derive(Error, Debug)]
pub enum SismicError {
    /// Transport failure (DNS, connect, timeout, TLS)
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Feed returned a non-success status
    #[error("seismic feed error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Body was not valid JSON for the expected shape
    #[error("Failed to parse GeoJSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Body was JSON but not a usable FeatureCollection
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A single feature could not be normalized
    #[error("Invalid event data: {0}")]
    Validation(String),
}

impl SismicError {
    /// Whether the feed was unreachable or answered with an error status.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Api { .. })
    }

    /// Whether the feed answered but the payload was malformed.
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::InvalidResponse(_) | Self::Validation(_)
        )
    }
}
