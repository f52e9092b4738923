use std::time::Duration;

use thiserror::Error;

/// Errors raised while retrieving a single page or a batch of pages.
///
/// Only `Exhausted` and `BatchTimeout` are surfaced to callers of the
/// orchestrator; the other variants describe why one stage of the
/// escalation ladder gave up and are logged, not returned.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("failed to fetch content from {url}")]
    Exhausted { url: String },

    #[error("batch of {count} fetches did not finish within {after:?}")]
    BatchTimeout { count: usize, after: Duration },
}

impl FetchError {
    /// Map a reqwest failure onto the variant the ladder reports for it.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Http(err)
        }
    }
}

/// Errors raised by a search engine or the multi-engine aggregator.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(#[from] FetchError),

    #[error("{engine} returned HTTP {status}")]
    Status { engine: String, status: u16 },

    #[error("{engine} returned no parsable results")]
    NoResults { engine: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("no search engine produced results for '{query}'")]
    Exhausted { query: String },
}

/// Errors from the unified `retrieve` entry point.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Errors raised while harvesting proxy candidates.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy source {source_url} failed: {reason}")]
    Source { source_url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: String, value: String },

    #[error("{name} must be between {min} and {max}")]
    OutOfRange { name: String, min: f64, max: f64 },
}
