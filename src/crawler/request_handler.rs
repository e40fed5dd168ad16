//! Contains the download stage of the crawler.
//!
//! [`Downloader::fetch`] performs one HTTP attempt and classifies the outcome:
//!
//! - a transport error, a body read error, or a status in the retryable set
//!   is a *retryable failure*;
//! - any other status, success or not, is *delivered* to the parser, which can
//!   look at [`Response::status`] itself.
//!
//! Retryable failures are counted per request fingerprint by the
//! [`RetryMonitor`]. A request is attempted at most `max_retry` times in
//! total; after that it is dropped and counted as failed. Granted retries go
//! straight back to the fetch queue without passing admission again, since
//! the dedup filter would reject them.
//!
//! The caller owns the downloader's in-flight guard for the whole attempt,
//! including pushing the result onward.

use crate::error::SpiderError;
use crate::request::{Fingerprint, Request};
use crate::response::Response;
use crate::stats::CrawlStats;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, trace, warn};

/// Statuses retried unless configured otherwise.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [500, 502, 503, 504, 408];

/// Builds the engine's shared HTTP client.
pub fn build_client(connect_timeout: Duration, read_write_timeout: Duration) -> Result<reqwest::Client, SpiderError> {
    let client = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_write_timeout)
        .build()?;
    Ok(client)
}

/// What happened to a single fetch attempt.
pub enum FetchResult<I> {
    /// The server answered with a status that is handed to the parser.
    Delivered(Response<I>),
    /// The attempt failed and the request should be fetched again.
    Retry(Request<I>),
    /// The attempt failed and the request has no attempts left.
    Failed,
}

impl<I> fmt::Debug for FetchResult<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchResult::Delivered(response) => f.debug_tuple("Delivered").field(response).finish(),
            FetchResult::Retry(request) => f.debug_tuple("Retry").field(request).finish(),
            FetchResult::Failed => f.write_str("Failed"),
        }
    }
}

/// A retryable failure.
#[derive(Debug)]
pub enum FetchError {
    Transport(reqwest::Error),
    Status(StatusCode),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "transport error: {}", e),
            FetchError::Status(status) => write!(f, "retryable status {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again; `attempt` failures have been recorded so far.
    Retry { attempt: u32 },
    /// Give up after `attempts` failures.
    GiveUp { attempts: u32 },
}

/// Failed-attempt counts keyed by request fingerprint.
#[derive(Debug)]
pub struct RetryMonitor {
    attempts: DashMap<Fingerprint, u32>,
    max_retry: u32,
}

impl RetryMonitor {
    pub fn new(max_retry: u32) -> Self {
        RetryMonitor {
            attempts: DashMap::new(),
            max_retry,
        }
    }

    /// Records one failed attempt and decides whether another is allowed.
    pub fn record_failure(&self, fingerprint: Fingerprint) -> RetryDecision {
        let mut entry = self.attempts.entry(fingerprint).or_insert(0);
        *entry += 1;
        let attempts = *entry;
        if attempts < self.max_retry {
            RetryDecision::Retry { attempt: attempts }
        } else {
            RetryDecision::GiveUp { attempts }
        }
    }

    /// Failed attempts recorded for `fingerprint`.
    pub fn attempts(&self, fingerprint: &Fingerprint) -> u32 {
        self.attempts.get(fingerprint).map(|entry| *entry).unwrap_or(0)
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }
}

pub struct Downloader {
    client: reqwest::Client,
    retry_statuses: HashSet<u16>,
    monitor: RetryMonitor,
    stats: Arc<CrawlStats>,
}

impl Downloader {
    pub fn new(
        client: reqwest::Client,
        retry_statuses: impl IntoIterator<Item = u16>,
        max_retry: u32,
        stats: Arc<CrawlStats>,
    ) -> Self {
        Downloader {
            client,
            retry_statuses: retry_statuses.into_iter().collect(),
            monitor: RetryMonitor::new(max_retry),
            stats,
        }
    }

    pub fn retry_monitor(&self) -> &RetryMonitor {
        &self.monitor
    }

    pub fn is_retryable(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }

    /// Makes one attempt at `request`.
    pub async fn fetch<I: Send + 'static>(&self, request: Request<I>) -> FetchResult<I> {
        let counters = &self.stats.downloader;
        counters.increment_called();

        match self.send(&request).await {
            Ok((status, headers, body)) => {
                counters.increment_completed();
                trace!("Fetched {} {} ({})", request.method(), request.url(), status);
                FetchResult::Delivered(Response::new(status, headers, body, request))
            }
            Err(e) => self.on_failure(request, e),
        }
    }

    async fn send<I>(&self, request: &Request<I>) -> Result<(StatusCode, HeaderMap, Bytes), FetchError> {
        let client = request.client().unwrap_or(&self.client);
        let mut builder = client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await.map_err(FetchError::Transport)?;
        let status = response.status();
        self.stats.record_response_status(status.as_u16());
        if self.is_retryable(status) {
            return Err(FetchError::Status(status));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(FetchError::Transport)?;
        Ok((status, headers, body))
    }

    fn on_failure<I>(&self, request: Request<I>, e: FetchError) -> FetchResult<I> {
        match self.monitor.record_failure(request.fingerprint()) {
            RetryDecision::Retry { attempt } => {
                self.stats.increment_retried();
                warn!(
                    "Fetching {} failed (attempt {}/{}), retrying: {}",
                    request.url(),
                    attempt,
                    self.monitor.max_retry(),
                    e
                );
                FetchResult::Retry(request)
            }
            RetryDecision::GiveUp { attempts } => {
                self.stats.downloader.increment_failed();
                error!(
                    "Giving up on {} after {} attempts: {}",
                    request.url(),
                    attempts,
                    e
                );
                FetchResult::Failed
            }
        }
    }
}
