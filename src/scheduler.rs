//! # Scheduler Module
//!
//! Admission control for the crawl frontier.
//!
//! ## Overview
//!
//! Every request a parser or caller submits passes through
//! [`Scheduler::admit`]. The scheduler either rejects it (counted as
//! *intercepted*) or accepts it and pushes it onto the fetch queue, which only
//! the coordinator reads. There is no frontier beyond that queue: accepted
//! requests are fetched in roughly FIFO order, and retries bypass admission
//! entirely.
//!
//! ## Admission checks
//!
//! Applied in order, stopping at the first failure:
//!
//! 1. the request is structurally valid (URL and parser present);
//! 2. its host is on the allow-list, when one is configured;
//! 3. its scheme is `http` or `https`;
//! 4. its fingerprint has not been seen before.
//!
//! The last check is a single test-and-insert on the bloom filter, so two
//! concurrent submissions of the same request admit exactly one of them. A
//! false positive drops a request that was never fetched; that is the price of
//! a fixed-size filter and is bounded by the configured rate.
//!
//! ## Example
//!
//! ```rust,ignore
//! let accepted = scheduler.admit(Request::get("https://example.com")?.with_parser(parse)).await?;
//! ```

use crate::bloom_filter::BloomFilter;
use crate::error::SpiderError;
use crate::queue::StageQueue;
use crate::request::Request;
use crate::state::StageCounters;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// Missing URL or parser.
    Invalid,
    /// Host not on the allow-list.
    Domain,
    /// Scheme other than `http`/`https`.
    Scheme,
    /// Fingerprint already seen.
    Duplicate,
}

impl fmt::Display for Interception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Interception::Invalid => "invalid request",
            Interception::Domain => "domain not allowed",
            Interception::Scheme => "unsupported scheme",
            Interception::Duplicate => "duplicate request",
        };
        f.write_str(reason)
    }
}

pub struct Scheduler<I> {
    filter: Mutex<BloomFilter>,
    allowed_domains: HashSet<String>,
    delay: Duration,
    fetch_queue: StageQueue<Request<I>>,
    counters: Arc<StageCounters>,
}

impl<I: Send + 'static> Scheduler<I> {
    pub fn new(
        filter: BloomFilter,
        allowed_domains: impl IntoIterator<Item = String>,
        delay: Duration,
        fetch_queue: StageQueue<Request<I>>,
        counters: Arc<StageCounters>,
    ) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|domain| domain.trim().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();

        Scheduler {
            filter: Mutex::new(filter),
            allowed_domains,
            delay,
            fetch_queue,
            counters,
        }
    }

    /// Runs the admission checks and enqueues the request if it passes.
    ///
    /// Returns `Ok(false)` when the request was intercepted. An error means the
    /// request was accepted but the fetch queue is gone, which only happens
    /// once the crawl has shut down.
    pub async fn admit(&self, request: Request<I>) -> Result<bool, SpiderError> {
        let _guard = self.counters.enter();
        self.counters.increment_called();

        if let Err(reason) = self.check(&request) {
            self.counters.increment_intercepted();
            debug!("Intercepted {} {}: {}", request.method(), request.url(), reason);
            return Ok(false);
        }

        self.counters.increment_accepted();
        trace!("Accepted {} {}", request.method(), request.url());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Err(e) = self.fetch_queue.push(request).await {
            warn!("Accepted request could not be queued: {}", e);
            return Err(e);
        }
        Ok(true)
    }

    /// Applies the admission checks, recording the fingerprint on success.
    pub(crate) fn check(&self, request: &Request<I>) -> Result<(), Interception> {
        if !request.is_valid() {
            return Err(Interception::Invalid);
        }

        if !self.allowed_domains.is_empty() {
            let allowed = request
                .host()
                .map(|host| self.allowed_domains.contains(&host.to_ascii_lowercase()))
                .unwrap_or(false);
            if !allowed {
                return Err(Interception::Domain);
            }
        }

        if !matches!(request.scheme(), "http" | "https") {
            return Err(Interception::Scheme);
        }

        let fingerprint = request.fingerprint();
        if self.filter.lock().test_and_add(&fingerprint) {
            return Err(Interception::Duplicate);
        }

        Ok(())
    }

    /// Accounts for a submission whose URL could not even be parsed.
    pub(crate) fn reject_unparsable(&self, url: &str, error: &url::ParseError) {
        self.counters.increment_called();
        self.counters.increment_intercepted();
        debug!("Intercepted unparsable url {:?}: {}", url, error);
    }

    pub fn counters(&self) -> &Arc<StageCounters> {
        &self.counters
    }

    pub fn allowed_domains(&self) -> &HashSet<String> {
        &self.allowed_domains
    }
}
