//! Bounded registry of the partitions that currently have a worker.
//!
//! A partition is leased to at most one worker and the number of leases never exceeds the pool
//! size. Admission over capacity is refused, never queued, so the poller simply retries on a later
//! tick.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::upstream::PartitionId;

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadyLeased,
    AtCapacity,
}

struct Lease {
    worker: AbortHandle,
    admitted_at: Instant,
}

#[derive(Clone)]
pub struct LeaseTable {
    leases: Arc<Mutex<HashMap<PartitionId, Lease>>>,
    capacity: usize,
}

impl LeaseTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::with_capacity(capacity))),
            capacity,
        }
    }

    /// Leases the partition to `worker`. The capacity check and the insert happen under one lock.
    pub fn admit(&self, partition: PartitionId, worker: AbortHandle) -> Admission {
        let mut leases = self.leases.lock();
        if leases.contains_key(&partition) {
            return Admission::AlreadyLeased;
        }
        if leases.len() >= self.capacity {
            return Admission::AtCapacity;
        }
        leases.insert(
            partition,
            Lease {
                worker,
                admitted_at: Instant::now(),
            },
        );
        Admission::Admitted
    }

    pub fn try_admit(&self, partition: PartitionId, worker: AbortHandle) -> bool {
        self.admit(partition, worker) == Admission::Admitted
    }

    /// Removes the lease. Releasing a partition that is not leased is a no-op.
    pub fn release(&self, partition: &PartitionId) {
        let removed = self.leases.lock().remove(partition);
        if let Some(lease) = removed {
            tracing::debug!(
                shard_id = %partition,
                held_ms = lease.admitted_at.elapsed().as_millis(),
                "Released lease"
            );
        }
    }

    pub fn has_lease(&self, partition: &PartitionId) -> bool {
        self.leases.lock().contains_key(partition)
    }

    pub fn is_at_capacity(&self) -> bool {
        self.leases.lock().len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How long the partition has been leased.
    pub fn held_for(&self, partition: &PartitionId) -> Option<Duration> {
        self.leases
            .lock()
            .get(partition)
            .map(|lease| lease.admitted_at.elapsed())
    }

    /// Revokes every lease and aborts its worker.
    pub(crate) fn revoke_all(&self) {
        let revoked: Vec<(PartitionId, Lease)> = self.leases.lock().drain().collect();
        for (partition, lease) in revoked {
            tracing::warn!(
                shard_id = %partition,
                held_ms = lease.admitted_at.elapsed().as_millis(),
                "Aborting worker"
            );
            lease.worker.abort();
        }
    }
}

/// Releases the lease when dropped, so a worker that panics or is aborted does not leave its
/// partition leased.
pub(crate) struct LeaseGuard {
    leases: LeaseTable,
    partition: PartitionId,
    released: bool,
}

impl LeaseGuard {
    pub(crate) fn new(leases: LeaseTable, partition: PartitionId) -> Self {
        Self {
            leases,
            partition,
            released: false,
        }
    }

    pub(crate) fn release(mut self) {
        self.leases.release(&self.partition);
        self.released = true;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            self.leases.release(&self.partition);
        }
    }
}
