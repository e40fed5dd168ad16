//! Bounded stage queues.
//!
//! A [`StageQueue`] is the sending half of a bounded tokio channel that never
//! makes a producer wait on the consumer directly. A push first tries the
//! channel; if it is full the item is handed to a helper task that waits for
//! room. Helper tasks are limited by a semaphore, so a producer only suspends
//! once `max_pending` pushes are already outstanding.
//!
//! Items waiting in a helper task are still counted by [`StageQueue::pending`],
//! which lets the idle monitor see work that has not reached the channel yet.

use crate::error::SpiderError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Semaphore;
use tracing::{trace, warn};

pub struct StageQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    pending: Arc<AtomicUsize>,
    overflow: Arc<Semaphore>,
}

/// Creates a queue holding up to `capacity` items with at most `max_pending`
/// overflow pushes outstanding.
pub fn stage_queue<T: Send + 'static>(
    name: &'static str,
    capacity: usize,
    max_pending: usize,
) -> (StageQueue<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let queue = StageQueue {
        name,
        tx,
        pending: Arc::new(AtomicUsize::new(0)),
        overflow: Arc::new(Semaphore::new(max_pending.max(1))),
    };
    (queue, rx)
}

impl<T: Send + 'static> StageQueue<T> {
    /// Pushes `item`, deferring to a helper task when the queue is full.
    ///
    /// Returns once the item is either in the queue or owned by a helper task.
    pub async fn push(&self, item: T) -> Result<(), SpiderError> {
        let item = match self.tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(SpiderError::ChannelClosed(self.name)),
            Err(TrySendError::Full(item)) => item,
        };

        let permit = Arc::clone(&self.overflow)
            .acquire_owned()
            .await
            .map_err(|_| SpiderError::ChannelClosed(self.name))?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        trace!(queue = self.name, "queue full, deferring push");

        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);
        let name = self.name;
        tokio::spawn(async move {
            if tx.send(item).await.is_err() {
                warn!(queue = name, "queue closed before a deferred push completed");
            }
            pending.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
        Ok(())
    }

    /// Items currently buffered in the channel.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes handed to helper tasks that have not landed yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// No buffered items and no deferred pushes.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0 && self.is_empty()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StageQueue<T> {
    fn clone(&self) -> Self {
        StageQueue {
            name: self.name,
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            overflow: Arc::clone(&self.overflow),
        }
    }
}
