//! Bounded-concurrency token pool
//!
//! A fixed pool of admission tokens ("slots") backed by a counting semaphore.
//! Fan-out stages take a slot per spawned sub-task and drop the guard when the
//! task's output has been fully forwarded. [`Slots::ensure_all_returned`] is
//! the finish-time invariant check: a pool with tokens still out signals a
//! leaked task, which is a programming defect, not a runtime condition.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// A fixed-capacity pool of concurrency tokens
#[derive(Clone)]
pub struct Slots {
    sem: Arc<Semaphore>,
    capacity: usize,
}

impl Slots {
    pub fn new(capacity: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take one slot, suspending until one is available
    pub async fn take(&self) -> Result<SlotGuard> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("slot semaphore closed".into()))?;
        Ok(SlotGuard { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently available for taking
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// Finish-time check that every slot has been returned
    pub fn ensure_all_returned(&self) -> Result<()> {
        let available = self.available();
        if available < self.capacity {
            return Err(Error::UnreturnedSlots {
                missing: self.capacity - available,
            });
        }
        Ok(())
    }
}

/// Guard for one taken slot; returns the slot when dropped
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}
