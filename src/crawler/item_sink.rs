//! Contains the output sink that parsers push extracted items into.
//!
//! The sink is a bounded FIFO on a kanal channel so that any number of
//! consumers can drain it. Pushes follow the same pattern as the stage queues:
//! a non-blocking attempt first, then a helper task bounded by a semaphore.
//!
//! Closing is only ever done through [`ItemSink::close_if_idle`], which takes
//! the write side of `closed` and checks emptiness under it. Pushes hold the
//! read side while they look at the flag and hand the item over, so an item
//! can never be accepted by a sink that is about to close.

use futures_util::stream::{self, BoxStream, StreamExt};
use kanal::{AsyncReceiver, AsyncSender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

struct SinkInner<I> {
    tx: AsyncSender<I>,
    rx: AsyncReceiver<I>,
    closed: RwLock<bool>,
    pending: AtomicUsize,
    overflow: Arc<Semaphore>,
}

/// Shared handle to the crawl's item output.
pub struct ItemSink<I> {
    inner: Arc<SinkInner<I>>,
}

impl<I> Clone for ItemSink<I> {
    fn clone(&self) -> Self {
        ItemSink {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A handle that does not keep the sink alive.
pub struct WeakItemSink<I> {
    inner: Weak<SinkInner<I>>,
}

impl<I> WeakItemSink<I> {
    /// Returns the sink if some [`ItemSink`] still refers to it.
    pub fn upgrade(&self) -> Option<ItemSink<I>> {
        self.inner.upgrade().map(|inner| ItemSink { inner })
    }
}

impl<I: Send + 'static> ItemSink<I> {
    pub fn new(capacity: usize, max_pending: usize) -> Self {
        let (tx, rx) = kanal::bounded_async(capacity.max(1));
        ItemSink {
            inner: Arc::new(SinkInner {
                tx,
                rx,
                closed: RwLock::new(false),
                pending: AtomicUsize::new(0),
                overflow: Arc::new(Semaphore::new(max_pending.max(1))),
            }),
        }
    }

    /// Adds an item to the output.
    ///
    /// Suspends only when the sink is full and the overflow budget is spent.
    /// Items pushed after the sink closed are dropped.
    pub async fn push(&self, item: I) {
        let mut slot = Some(item);
        {
            let closed = self.inner.closed.read();
            if *closed {
                warn!("Item pushed after the output sink closed; dropping it");
                return;
            }
            match self.inner.tx.try_send_option(&mut slot) {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    warn!("Output sink rejected an item: {}", e);
                    return;
                }
            }
        }

        let Some(item) = slot else {
            return;
        };

        let permit = match Arc::clone(&self.inner.overflow).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Output overflow budget is gone; dropping item");
                return;
            }
        };

        {
            let closed = self.inner.closed.read();
            if *closed {
                warn!("Item pushed after the output sink closed; dropping it");
                return;
            }
            self.inner.pending.fetch_add(1, Ordering::SeqCst);
        }
        trace!("Output sink full, deferring push");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.tx.send(item).await {
                warn!("Deferred item was lost: {}", e);
            }
            inner.pending.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    /// A stream of items that ends once the sink is closed and drained.
    ///
    /// Several streams may be drained at once; each item goes to exactly one
    /// of them. Dropping a stream while it is waiting for an item may lose
    /// that item.
    pub fn drain(&self) -> BoxStream<'static, I> {
        stream::unfold(self.inner.rx.clone(), |rx| async move {
            match rx.recv().await {
                Ok(item) => Some((item, rx)),
                Err(_) => None,
            }
        })
        .boxed()
    }

    pub fn downgrade(&self) -> WeakItemSink<I> {
        WeakItemSink {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Items buffered plus deferred pushes, at this instant.
    pub fn len(&self) -> usize {
        self.inner.tx.len() + self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.read()
    }

    /// Closes the sink if nothing is buffered or in transit.
    ///
    /// Returns whether the sink is closed after the call.
    pub fn close_if_idle(&self) -> bool {
        let mut closed = self.inner.closed.write();
        if *closed {
            return true;
        }
        if self.inner.pending.load(Ordering::SeqCst) != 0 || !self.inner.tx.is_empty() {
            return false;
        }
        if let Err(e) = self.inner.tx.close() {
            debug!("Output channel was already closed: {}", e);
        }
        *closed = true;
        debug!("Output sink closed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn items_come_out_in_order() {
        let sink = ItemSink::new(8, 8);
        for n in 0..5 {
            sink.push(n).await;
        }
        assert_eq!(sink.len(), 5);
        assert!(!sink.close_if_idle());

        let mut drain = sink.drain();
        for n in 0..5 {
            assert_eq!(drain.next().await, Some(n));
        }
        assert!(sink.is_empty());
        assert!(sink.close_if_idle());
        assert_eq!(drain.next().await, None);
    }

    #[tokio::test]
    async fn full_sink_defers_pushes() {
        let sink = ItemSink::new(2, 8);
        for n in 0..6 {
            sink.push(n).await;
        }
        assert_eq!(sink.len(), 6);
        assert!(!sink.close_if_idle());

        let mut drain = sink.drain();
        let mut received = Vec::new();
        while received.len() < 6 {
            received.push(drain.next().await.unwrap());
        }
        received.sort_unstable();
        assert_eq!(received, vec![0, 1, 2, 3, 4, 5]);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !sink.close_if_idle() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn pushes_after_close_are_dropped() {
        let sink = ItemSink::new(4, 4);
        assert!(sink.close_if_idle());
        sink.push(1).await;
        assert!(sink.is_closed());
        assert!(sink.is_empty());
        assert_eq!(sink.drain().next().await, None);
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_the_sink_alive() {
        let sink = ItemSink::new(4, 4);
        let weak = sink.downgrade();
        sink.push(1).await;
        assert_eq!(weak.upgrade().map(|sink| sink.len()), Some(1));

        let mut drain = sink.drain();
        drop(sink);
        assert!(weak.upgrade().is_none());
        assert_eq!(drain.next().await, Some(1));
        assert_eq!(drain.next().await, None);
    }

    #[tokio::test]
    async fn concurrent_drains_share_the_items() {
        let sink = ItemSink::new(64, 8);
        for n in 0..40 {
            sink.push(n).await;
        }

        let first = tokio::spawn(sink.drain().collect::<Vec<u32>>());
        let second = tokio::spawn(sink.drain().collect::<Vec<u32>>());

        tokio::time::timeout(Duration::from_secs(1), async {
            while !sink.close_if_idle() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let mut all = first.await.unwrap();
        all.extend(second.await.unwrap());
        all.sort_unstable();
        assert_eq!(all, (0..40).collect::<Vec<u32>>());
    }
}
