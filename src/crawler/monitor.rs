//! Debounced idle detection.
//!
//! A monitor samples an idle probe once per heartbeat. Consecutive idle
//! samples are counted; any busy sample resets the count. When the count
//! reaches the threshold a one-shot confirmation runs, and only if that also
//! succeeds does the monitor report quiescence. A failed confirmation starts
//! the count over.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Consecutive-idle counter behind [`IdleMonitor`].
#[derive(Debug, Clone)]
pub struct IdleCounter {
    count: u32,
    threshold: u32,
}

impl IdleCounter {
    pub fn new(threshold: u32) -> Self {
        IdleCounter {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Records one sample. Returns `true` once `threshold` idle samples in a
    /// row have been seen.
    pub fn observe(&mut self, idle: bool) -> bool {
        if idle {
            self.count = self.count.saturating_add(1);
            self.count >= self.threshold
        } else {
            self.count = 0;
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    name: &'static str,
    threshold: u32,
    heartbeat: Duration,
}

impl IdleMonitor {
    pub fn new(name: &'static str, threshold: u32, heartbeat: Duration) -> Self {
        IdleMonitor {
            name,
            threshold,
            heartbeat,
        }
    }

    /// Samples `probe` every heartbeat until quiescence is confirmed by
    /// `confirm` (returns `true`) or `stop` resolves (returns `false`).
    pub async fn wait<P, C, S>(&self, mut probe: P, mut confirm: C, stop: S) -> bool
    where
        P: FnMut() -> bool,
        C: FnMut() -> bool,
        S: Future<Output = ()>,
    {
        let mut counter = IdleCounter::new(self.threshold);
        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("{} monitor stopped", self.name);
                    return false;
                }
                _ = ticker.tick() => {}
            }

            if !counter.observe(probe()) {
                trace!("{} monitor: idle count {}", self.name, counter.count());
                continue;
            }

            if confirm() {
                debug!("{} monitor confirmed quiescence", self.name);
                return true;
            }
            debug!("{} monitor: confirmation failed, restarting count", self.name);
            counter.reset();
        }
    }
}
