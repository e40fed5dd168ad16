//! Module for tracking the operational state of each crawl stage.
//!
//! Every stage (scheduler, downloader, dispatcher) owns a [`StageCounters`]
//! block of six atomic counters. The cumulative ones feed the final summary;
//! the in-flight one is what the coordinator polls to decide whether the
//! crawl has gone quiet.
//!
//! In-flight work is tracked through [`InFlight`] guards rather than paired
//! increment/decrement calls, so a stage cannot leak an in-flight count on an
//! early return or a panicking parser.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters for a single crawl stage.
#[derive(Debug, Default)]
pub struct StageCounters {
    called: AtomicUsize,
    failed: AtomicUsize,
    accepted: AtomicUsize,
    intercepted: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Point-in-time copy of a [`StageCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    pub called: usize,
    pub failed: usize,
    pub accepted: usize,
    pub intercepted: usize,
    pub completed: usize,
    pub in_flight: usize,
}

impl StageCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn increment_called(&self) {
        self.called.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_intercepted(&self) {
        self.intercepted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one unit of work as in flight until the returned guard is dropped.
    pub fn enter(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            counters: Arc::clone(self),
        }
    }

    pub fn called(&self) -> usize {
        self.called.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn intercepted(&self) -> usize {
        self.intercepted.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            called: self.called(),
            failed: self.failed(),
            accepted: self.accepted(),
            intercepted: self.intercepted(),
            completed: self.completed(),
            in_flight: self.in_flight(),
        }
    }
}

/// RAII marker for in-flight work; decrements the stage's counter on drop.
#[must_use = "work is only counted as in flight while the guard is alive"]
#[derive(Debug)]
pub struct InFlight {
    counters: Arc<StageCounters>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
