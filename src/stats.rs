//! # Statistics Module
//!
//! Collects the per-stage counters of a crawl and renders the end-of-run
//! summary.
//!
//! ## Overview
//!
//! `CrawlStats` owns one [`StageCounters`] block for each of the scheduler,
//! downloader and dispatcher stages, plus a few crawl-wide extras (retries,
//! response status distribution, elapsed time). The five headline numbers of
//! the summary obey two identities:
//!
//! - `called = intercepted + accepted` at every instant;
//! - `accepted = failed + completed` once the crawl is quiescent.
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = crawler.stats();
//! let stats = crawler.start_crawl().await?;
//! println!("{}", stats.to_json_string_pretty()?);
//! ```

use crate::error::SpiderError;
use crate::state::{StageCounters, StageSnapshot};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// A snapshot of the current statistics, used for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub called: usize,
    pub intercepted: usize,
    pub accepted: usize,
    pub failed: usize,
    pub completed: usize,
    pub retried: usize,
    pub scheduler: StageSnapshot,
    pub downloader: StageSnapshot,
    pub dispatcher: StageSnapshot,
    pub response_status_counts: BTreeMap<u16, usize>,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub elapsed: Duration,
}

fn serialize_duration_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Cumulative counters for one crawl.
#[derive(Debug)]
pub struct CrawlStats {
    start_time: Instant,
    pub scheduler: Arc<StageCounters>,
    pub downloader: Arc<StageCounters>,
    pub dispatcher: Arc<StageCounters>,
    retried: AtomicUsize,
    response_status_counts: DashMap<u16, usize>,
}

impl CrawlStats {
    pub(crate) fn new() -> Self {
        CrawlStats {
            start_time: Instant::now(),
            scheduler: StageCounters::new(),
            downloader: StageCounters::new(),
            dispatcher: StageCounters::new(),
            retried: AtomicUsize::new(0),
            response_status_counts: DashMap::new(),
        }
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    /// Requests submitted to the scheduler.
    pub fn called(&self) -> usize {
        self.scheduler.called()
    }

    /// Requests rejected by validation or filtering.
    pub fn intercepted(&self) -> usize {
        self.scheduler.intercepted()
    }

    /// Requests admitted for download.
    pub fn accepted(&self) -> usize {
        self.scheduler.accepted()
    }

    /// Requests dropped after exhausting their attempts.
    pub fn failed(&self) -> usize {
        self.downloader.failed()
    }

    /// Requests fetched and handed to a parser.
    pub fn completed(&self) -> usize {
        self.downloader.completed()
    }

    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Whether every stage reports zero in-flight work.
    pub fn stages_idle(&self) -> bool {
        self.scheduler.is_idle() && self.downloader.is_idle() && self.dispatcher.is_idle()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let response_status_counts = self
            .response_status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        StatsSnapshot {
            called: self.called(),
            intercepted: self.intercepted(),
            accepted: self.accepted(),
            failed: self.failed(),
            completed: self.completed(),
            retried: self.retried(),
            scheduler: self.scheduler.snapshot(),
            downloader: self.downloader.snapshot(),
            dispatcher: self.dispatcher.snapshot(),
            response_status_counts,
            elapsed: self.start_time.elapsed(),
        }
    }

    /// Converts the snapshot into a JSON string.
    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Converts the snapshot into a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl Default for CrawlStats {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  called = intercepted + accepted")?;
        writeln!(f, "  accepted = failed + completed")?;
        writeln!(f)?;
        writeln!(f, "  called      : {}", snapshot.called)?;
        writeln!(f, "  intercepted : {}", snapshot.intercepted)?;
        writeln!(f, "  accepted    : {}", snapshot.accepted)?;
        writeln!(f, "  failed      : {}", snapshot.failed)?;
        writeln!(f, "  completed   : {}", snapshot.completed)?;
        writeln!(f, "  retried     : {}", snapshot.retried)?;
        writeln!(f, "  duration    : {:?}", snapshot.elapsed)?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .response_status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status      : {}", status_string)
    }
}
