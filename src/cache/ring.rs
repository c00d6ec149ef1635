//! Export ring: single-producer/single-consumer handoff of completed
//! flows with a preallocated slot pool.
//!
//! The producer (storage worker) swaps a completed record into the ring
//! in exchange for an empty one; the consumer (output worker) encodes the
//! record and returns the slot. Slot lifetimes are a round trip:
//! producer-owned -> ring -> consumer-owned -> pool -> producer-owned.
//! The hot path performs no heap allocation, and a full ring stalls the
//! producer rather than dropping flows.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::RingError;
use crate::flow::FlowRecord;

/// Producer half, owned by the storage worker.
pub struct ExportRing {
    completed: Sender<Box<FlowRecord>>,
    pool: Receiver<Box<FlowRecord>>,
}

/// Consumer half, owned by the output worker.
pub struct ExportSink {
    completed: Receiver<Box<FlowRecord>>,
    pool: Sender<Box<FlowRecord>>,
}

/// Build a ring with `capacity` preallocated record slots.
pub fn export_ring(capacity: usize) -> (ExportRing, ExportSink) {
    assert!(capacity > 0, "ring capacity validated at configuration");

    let (completed_tx, completed_rx) = bounded(capacity);
    let (pool_tx, pool_rx) = bounded(capacity);
    for _ in 0..capacity {
        pool_tx
            .send(Box::new(FlowRecord::empty()))
            .expect("pool channel sized for the preallocation");
    }

    (
        ExportRing {
            completed: completed_tx,
            pool: pool_rx,
        },
        ExportSink {
            completed: completed_rx,
            pool: pool_tx,
        },
    )
}

impl ExportRing {
    /// Take an empty slot from the pool. Blocks while every slot is in
    /// flight; errors once the consumer is gone.
    pub fn acquire(&self) -> Result<Box<FlowRecord>, RingError> {
        self.pool.recv().map_err(|_| RingError::Closed)
    }

    /// Hand a completed record to the consumer. Blocks while the ring is
    /// full; never drops.
    pub fn push(&self, rec: Box<FlowRecord>) -> Result<(), RingError> {
        self.completed.send(rec).map_err(|_| RingError::Closed)
    }
}

impl ExportSink {
    /// Receive the next completed record. Returns `None` once the
    /// producer is gone and the ring is drained.
    pub fn recv(&self) -> Option<Box<FlowRecord>> {
        self.completed.recv().ok()
    }

    /// Receive the next completed record without blocking.
    pub fn try_recv(&self) -> Option<Box<FlowRecord>> {
        self.completed.try_recv().ok()
    }

    /// Return a slot to the pool. The record is erased here so the
    /// producer always receives empty slots.
    pub fn release(&self, mut rec: Box<FlowRecord>) {
        rec.erase();
        // The producer may already be gone during shutdown; the slot is
        // then simply dropped.
        let _ = self.pool.send(rec);
    }
}
