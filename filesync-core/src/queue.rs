//! Ordered hand-off between the watchers and the dispatcher.
//!
//! Any number of [`QueueSender`] clones push from plain threads; the single
//! [`QueueReceiver`] wakes as soon as something arrives. Events come out in
//! the order they were pushed, across all senders.

use crate::pool::PooledEvent;
use thiserror::Error;
use tokio::sync::mpsc;

/// The receiving side is gone; the event was handed back to its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue closed")]
pub struct QueueClosed;

pub fn event_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<PooledEvent>,
}

impl QueueSender {
    /// Append an event. Does not block and needs no runtime.
    pub fn push(&self, event: PooledEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).map_err(|_| QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<PooledEvent>,
}

impl QueueReceiver {
    /// Oldest queued event, or `None` when the queue is empty right now.
    pub fn pop(&mut self) -> Option<PooledEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once every sender is dropped and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<PooledEvent> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting pushes; queued events can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
