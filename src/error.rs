//! Error types shared across the engine.
//!
//! Admission rejections and fetch failures are never surfaced as errors; they
//! are counted in [`CrawlStats`](crate::stats::CrawlStats). `SpiderError` covers
//! what the caller can actually act on: bad configuration, client construction,
//! stats export and channels that have gone away.

use thiserror::Error;

/// The error type returned by fallible engine operations.
#[derive(Debug, Error)]
pub enum SpiderError {
    /// The crawler was configured with values it cannot run with.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Building or driving the HTTP client failed.
    #[error("http client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// A URL could not be parsed.
    #[error("invalid url: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// Serializing statistics failed.
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A queue's receiving side is gone.
    #[error("{0} queue is closed")]
    ChannelClosed(&'static str),

    #[error("{0}")]
    GeneralError(String),
}
