//! Fixed-capacity event pool.
//!
//! Every record is created when the pool is built and recycled afterwards, so
//! the memory held by in-flight events is bounded by the configured capacity
//! no matter how much filesystem churn the watchers see.

use crate::error::PoolExhausted;
use crate::event::ChangeEvent;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct Shared {
    capacity: usize,
    free: Mutex<Vec<ChangeEvent>>,
}

impl Shared {
    fn free_list(&self) -> MutexGuard<'_, Vec<ChangeEvent>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to a shared pool of [`ChangeEvent`] records.
#[derive(Clone)]
pub struct EventPool {
    shared: Arc<Shared>,
}

impl EventPool {
    pub fn new(capacity: usize) -> Self {
        let free = (0..capacity).map(|_| ChangeEvent::with_reserved_names()).collect();
        Self {
            shared: Arc::new(Shared {
                capacity,
                free: Mutex::new(free),
            }),
        }
    }

    /// Check out a record. Never blocks; fails once every slot is in use.
    pub fn allocate(&self) -> Result<PooledEvent, PoolExhausted> {
        let event = self.shared.free_list().pop().ok_or(PoolExhausted {
            capacity: self.shared.capacity,
        })?;
        Ok(PooledEvent {
            event,
            pool: self.shared.clone(),
        })
    }

    /// Return a record to the pool. Equivalent to dropping the handle.
    pub fn free(&self, event: PooledEvent) {
        drop(event);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn available(&self) -> usize {
        self.shared.free_list().len()
    }

    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }
}

impl std::fmt::Debug for EventPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// A checked-out record. Owning the handle is owning the slot: it goes back
/// to its pool when dropped, so a slot can be neither leaked nor freed twice.
pub struct PooledEvent {
    event: ChangeEvent,
    pool: Arc<Shared>,
}

impl Deref for PooledEvent {
    type Target = ChangeEvent;

    fn deref(&self) -> &ChangeEvent {
        &self.event
    }
}

impl DerefMut for PooledEvent {
    fn deref_mut(&mut self) -> &mut ChangeEvent {
        &mut self.event
    }
}

impl Drop for PooledEvent {
    fn drop(&mut self) {
        let mut event = std::mem::take(&mut self.event);
        event.reset();
        self.pool.free_list().push(event);
    }
}

impl std::fmt::Debug for PooledEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.event.fmt(f)
    }
}
