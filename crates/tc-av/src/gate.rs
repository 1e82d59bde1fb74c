//! Admission control for encoder jobs.
//!
//! [`ConcurrencyGate`] bounds how many encoder processes run at once. Waiters
//! queue on a FIFO semaphore, so every acquire is eventually admitted once
//! earlier holders release. A [`GateSlot`] gives its permit back exactly once,
//! either explicitly through [`GateSlot::release`] or when dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use tc_core::{Error, Result};

/// Snapshot of gate occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub capacity: usize,
    pub running: usize,
    pub waiting: usize,
}

#[derive(Debug)]
struct Counters {
    running: AtomicUsize,
    waiting: AtomicUsize,
}

/// Bounded admission for encoder jobs. Cheap to clone; clones share slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl ConcurrencyGate {
    /// Create a gate admitting `capacity` jobs (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters {
                running: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<GateSlot> {
        let _waiting = WaitingGuard::enter(&self.counters);
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("concurrency gate closed".into()))?;
        Ok(self.admit(permit))
    }

    /// Wait for a free slot, giving up with [`Error::Cancelled`] if `cancel`
    /// fires first. A cancelled waiter leaves the queue immediately.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> Result<GateSlot> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            slot = self.acquire() => slot,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> GateSlot {
        self.counters.running.fetch_add(1, Ordering::SeqCst);
        GateSlot {
            permit: Some(permit),
            counters: Arc::clone(&self.counters),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            capacity: self.capacity,
            running: self.counters.running.load(Ordering::SeqCst),
            waiting: self.counters.waiting.load(Ordering::SeqCst),
        }
    }
}

/// Counts a caller as waiting for as long as its acquire future is alive.
struct WaitingGuard<'a>(&'a Counters);

impl<'a> WaitingGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        counters.waiting.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An admitted job's slot in the gate.
#[derive(Debug)]
#[must_use = "dropping the slot releases it immediately"]
pub struct GateSlot {
    permit: Option<OwnedSemaphorePermit>,
    counters: Arc<Counters>,
}

impl GateSlot {
    /// Give the slot back. Further calls (and the eventual drop) are no-ops.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.counters.running.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        }
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        self.release();
    }
}
