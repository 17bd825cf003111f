//! Reconciles the partitions reported by upstream against the lease table.
use tokio::task::AbortHandle;
use tracing::debug;

use crate::Result;
use crate::lease::{Admission, LeaseTable};
use crate::upstream::{PartitionId, ShardSource};
use crate::worker::StartGate;

/// Spawns gated workers on behalf of the poller.
pub trait Launcher {
    /// Spawns a worker for `partition` that waits on the returned gate before doing anything.
    fn launch(&mut self, partition: PartitionId) -> (AbortHandle, StartGate);
}

/// What a single poll did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub listed: usize,
    pub started: Vec<PartitionId>,
    /// Unleased partitions left for a later tick because the table was full.
    pub deferred: usize,
}

pub struct Poller<S> {
    source: S,
    stream_name: String,
    leases: LeaseTable,
}

impl<S: ShardSource> Poller<S> {
    pub fn new(source: S, stream_name: impl Into<String>, leases: LeaseTable) -> Self {
        Self {
            source,
            stream_name: stream_name.into(),
            leases,
        }
    }

    /// Lists the partitions and starts a worker for each unleased one, in upstream order, until
    /// the table is full. A listing failure abandons the poll without touching the table.
    pub async fn poll<L: Launcher>(&self, launcher: &mut L) -> Result<PollSummary> {
        let partitions = self.source.list_partitions(&self.stream_name).await?;
        let mut summary = PollSummary {
            listed: partitions.len(),
            ..Default::default()
        };

        for (idx, partition) in partitions.iter().enumerate() {
            if self.leases.is_at_capacity() {
                summary.deferred = partitions
                    .iter()
                    .skip(idx)
                    .filter(|p| !self.leases.has_lease(p))
                    .count();
                break;
            }
            if self.leases.has_lease(partition) {
                continue;
            }

            let (worker, gate) = launcher.launch(partition.clone());
            match self.leases.admit(partition.clone(), worker) {
                Admission::Admitted => {
                    if gate.send(()).is_err() {
                        // the worker is already gone, e.g. aborted during shutdown
                        self.leases.release(partition);
                        continue;
                    }
                    summary.started.push(partition.clone());
                }
                refused => {
                    debug!(shard_id = %partition, ?refused, "Admission refused");
                }
            }
        }

        Ok(summary)
    }
}
