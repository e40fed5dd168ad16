//! Concurrency budgets for the crawl stages.
//!
//! Each stage that runs work in spawned tasks (downloads, parser dispatch)
//! owns a fixed number of [`StageSlots`]. The coordinator takes a slot before
//! it takes work off the stage's queue, so a stage with no free slots leaves
//! its queue alone and backpressure reaches the producers.

use crate::state::{InFlight, StageCounters};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// One unit of work taken off a stage queue.
///
/// The slot bounds the stage's concurrency; the guard keeps the stage marked
/// busy. Dropping either releases it.
pub struct Job<T> {
    pub item: T,
    pub slot: OwnedSemaphorePermit,
    pub guard: InFlight,
}

/// A fixed-size pool of execution slots for one stage.
#[derive(Debug, Clone)]
pub struct StageSlots {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl StageSlots {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.clamp(1, Semaphore::MAX_PERMITS);
        StageSlots {
            name,
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits for a free slot. Returns `None` once the pool has been closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    /// Waits for a free slot, then for the next item on `rx`.
    ///
    /// Cancel-safe: dropping the future before it resolves loses no item. The
    /// in-flight guard is entered in the same step that takes the item, so the
    /// stage never looks idle while holding work.
    pub async fn next_job<T>(&self, rx: &mut Receiver<T>, counters: &Arc<StageCounters>) -> Option<Job<T>> {
        let slot = self.acquire().await?;
        let item = rx.recv().await?;
        let guard = counters.enter();
        trace!("{}: took a job, {} slots left", self.name, self.available());
        Some(Job { item, slot, guard })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.size - self.available()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stops handing out slots; pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn job_holds_a_slot_and_a_guard() {
        let slots = StageSlots::new("test", 2);
        let counters = StageCounters::new();
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("a").await.unwrap();

        let job = slots.next_job(&mut rx, &counters).await.unwrap();
        assert_eq!(job.item, "a");
        assert_eq!(slots.in_use(), 1);
        assert_eq!(counters.in_flight(), 1);

        drop(job);
        assert_eq!(slots.in_use(), 0);
        assert!(counters.is_idle());
    }

    #[tokio::test]
    async fn no_work_is_taken_without_a_free_slot() {
        let slots = StageSlots::new("test", 1);
        let counters = StageCounters::new();
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();

        let first = slots.next_job(&mut rx, &counters).await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(20), slots.next_job(&mut rx, &counters)).await;
        assert!(second.is_err());
        assert_eq!(rx.len(), 1);

        drop(first);
        let second = slots.next_job(&mut rx, &counters).await.unwrap();
        assert_eq!(second.item, 2);
    }

    #[tokio::test]
    async fn closed_pool_yields_nothing() {
        let slots = StageSlots::new("test", 1);
        let counters = StageCounters::new();
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();
        slots.close();
        assert!(slots.next_job(&mut rx, &counters).await.is_none());
        assert_eq!(rx.len(), 1);
    }
}
