//! # Builder Module
//!
//! Provides [`CrawlerConfig`] and [`CrawlerBuilder`], a fluent API for
//! constructing [`Crawler`] instances.
//!
//! ## Overview
//!
//! Every tunable of the engine lives in `CrawlerConfig`, which has sensible
//! defaults and can be loaded from any serde format. `CrawlerBuilder` wraps a
//! config with chainable setters plus the one thing a config cannot carry, a
//! pre-built HTTP client. [`CrawlerBuilder::build`] validates the settings
//! before anything is allocated.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_engine::CrawlerBuilder;
//! use std::time::Duration;
//!
//! let crawler = CrawlerBuilder::<Article>::new()
//!     .max_retry(3)
//!     .allowed_domains(["example.com"])
//!     .request_delay(Duration::from_millis(250))
//!     .max_concurrent_downloads(64)
//!     .build()?;
//! ```

use crate::crawler::request_handler::DEFAULT_RETRY_STATUSES;
use crate::crawler::Crawler;
use crate::error::SpiderError;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of attempts per request, the first one included.
    pub max_retry: u32,
    /// Response statuses treated as transient failures.
    pub retry_statuses: Vec<u16>,
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub read_write_timeout: Duration,
    /// Consecutive idle heartbeats before quiescence is confirmed.
    pub max_idle: u32,
    #[serde(with = "duration_millis")]
    pub heartbeat: Duration,
    /// Hosts that may be crawled. Empty allows every host.
    pub allowed_domains: Vec<String>,
    /// Fixed pause applied to every accepted request before it is queued.
    #[serde(with = "duration_millis")]
    pub request_delay: Duration,
    pub fetch_queue_capacity: usize,
    pub response_queue_capacity: usize,
    pub item_queue_capacity: usize,
    pub max_concurrent_downloads: usize,
    pub max_concurrent_parsers: usize,
    /// Deferred pushes allowed per queue once it is full.
    pub max_pending_pushes: usize,
    /// Number of distinct requests the dedup filter is sized for.
    pub expected_requests: u64,
    /// Target false-positive rate of the dedup filter.
    pub false_positive_rate: f64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            max_retry: 5,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            connect_timeout: Duration::from_secs(10),
            read_write_timeout: Duration::from_secs(10),
            max_idle: 10,
            heartbeat: Duration::from_secs(1),
            allowed_domains: Vec::new(),
            request_delay: Duration::ZERO,
            fetch_queue_capacity: 4096,
            response_queue_capacity: 4096,
            item_queue_capacity: 4096,
            max_concurrent_downloads: 1024,
            max_concurrent_parsers: 1024,
            max_pending_pushes: 4096,
            expected_requests: 1_000_000,
            false_positive_rate: 0.01,
        }
    }
}

impl CrawlerConfig {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), SpiderError> {
        let non_zero = [
            ("max_retry", self.max_retry as usize),
            ("max_idle", self.max_idle as usize),
            ("fetch_queue_capacity", self.fetch_queue_capacity),
            ("response_queue_capacity", self.response_queue_capacity),
            ("item_queue_capacity", self.item_queue_capacity),
            ("max_concurrent_downloads", self.max_concurrent_downloads),
            ("max_concurrent_parsers", self.max_concurrent_parsers),
            ("max_pending_pushes", self.max_pending_pushes),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(SpiderError::ConfigurationError(format!(
                    "{} must be greater than 0.",
                    name
                )));
            }
        }
        if self.heartbeat.is_zero() {
            return Err(SpiderError::ConfigurationError(
                "heartbeat must be greater than 0.".to_string(),
            ));
        }
        if self.expected_requests == 0 {
            return Err(SpiderError::ConfigurationError(
                "expected_requests must be greater than 0.".to_string(),
            ));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(SpiderError::ConfigurationError(format!(
                "false_positive_rate must be between 0 and 1, got {}.",
                self.false_positive_rate
            )));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Fluent constructor for a [`Crawler`] producing items of type `I`.
pub struct CrawlerBuilder<I> {
    config: CrawlerConfig,
    http_client: Option<reqwest::Client>,
    _item: PhantomData<fn() -> I>,
}

impl<I: Send + 'static> Default for CrawlerBuilder<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Send + 'static> CrawlerBuilder<I> {
    pub fn new() -> Self {
        Self::with_config(CrawlerConfig::default())
    }

    /// Starts from an existing configuration.
    pub fn with_config(config: CrawlerConfig) -> Self {
        CrawlerBuilder {
            config,
            http_client: None,
            _item: PhantomData,
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Sets the maximum number of attempts per request.
    pub fn max_retry(mut self, attempts: u32) -> Self {
        self.config.max_retry = attempts;
        self
    }

    /// Adds a status to the retryable set.
    pub fn add_retry_status(mut self, status: u16) -> Self {
        if !self.config.retry_statuses.contains(&status) {
            self.config.retry_statuses.push(status);
        }
        self
    }

    /// Replaces the retryable set.
    pub fn retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.config.retry_statuses = statuses.into_iter().collect();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_write_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Uses `client` for every request without its own client. The timeout
    /// settings are ignored when a client is supplied.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets how many idle heartbeats in a row end the crawl.
    pub fn max_idle(mut self, heartbeats: u32) -> Self {
        self.config.max_idle = heartbeats;
        self
    }

    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.config.heartbeat = interval;
        self
    }

    /// Restricts the crawl to the given hosts.
    pub fn allowed_domains<D>(mut self, domains: impl IntoIterator<Item = D>) -> Self
    where
        D: Into<String>,
    {
        self.config.allowed_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn fetch_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.fetch_queue_capacity = capacity;
        self
    }

    pub fn response_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.response_queue_capacity = capacity;
        self
    }

    pub fn item_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.item_queue_capacity = capacity;
        self
    }

    /// Sets the maximum number of concurrent downloads.
    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.config.max_concurrent_downloads = limit;
        self
    }

    /// Sets the maximum number of parsers running at once.
    pub fn max_concurrent_parsers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_parsers = limit;
        self
    }

    pub fn max_pending_pushes(mut self, limit: usize) -> Self {
        self.config.max_pending_pushes = limit;
        self
    }

    /// Sizes the dedup filter.
    pub fn dedup_capacity(mut self, expected_requests: u64, false_positive_rate: f64) -> Self {
        self.config.expected_requests = expected_requests;
        self.config.false_positive_rate = false_positive_rate;
        self
    }

    /// Validates the settings and assembles the `Crawler`.
    pub fn build(self) -> Result<Crawler<I>, SpiderError> {
        self.config.validate()?;
        Crawler::new(self.config, self.http_client)
    }
}
