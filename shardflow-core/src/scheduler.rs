//! The driver: ticks the poller, collects worker exits and owns teardown.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::codec::{Observer, RecordCodec, SchemaHandle};
use crate::cursor::CursorStore;
use crate::lease::LeaseTable;
use crate::poller::{Launcher, Poller};
use crate::upstream::{PartitionId, ShardSource};
use crate::worker::{
    ShardWorker, StartGate, WorkerConfig, WorkerContext, WorkerExit, WorkerOutcome,
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub stream_name: String,
    pub pool_size: usize,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub idle_backoff_base: Duration,
    pub idle_backoff_max: Duration,
    pub shutdown_timeout: Duration,
}

/// Counters reported when the scheduler stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub workers_started: u64,
    pub worker_failures: u64,
}

pub struct Scheduler<S, C> {
    source: S,
    codec: C,
    schema: Arc<SchemaHandle>,
    observer: Arc<dyn Observer>,
    cursors: CursorStore,
    leases: LeaseTable,
    config: SchedulerConfig,
}

/// Spawns gated workers into the driver's join set.
struct WorkerLauncher<'a, S, C> {
    workers: &'a mut JoinSet<WorkerOutcome>,
    ctx: &'a WorkerContext<S, C>,
}

impl<S, C> Launcher for WorkerLauncher<'_, S, C>
where
    S: ShardSource,
    C: RecordCodec,
{
    fn launch(&mut self, partition: PartitionId) -> (AbortHandle, StartGate) {
        let (tx, rx) = oneshot::channel();
        let worker = ShardWorker::new(partition, self.ctx.clone());
        (self.workers.spawn(worker.run(rx)), tx)
    }
}

impl<S, C> Scheduler<S, C>
where
    S: ShardSource,
    C: RecordCodec,
{
    pub fn new(
        source: S,
        codec: C,
        schema: SchemaHandle,
        observer: Arc<dyn Observer>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            codec,
            schema: Arc::new(schema),
            observer,
            cursors: CursorStore::new(),
            leases: LeaseTable::new(config.pool_size),
            config,
        }
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Runs until `cancel` fires, then stops every worker and waits for them up to the shutdown
    /// timeout before aborting the rest.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SchedulerStats> {
        let ctx = WorkerContext {
            source: self.source.clone(),
            codec: self.codec.clone(),
            schema: Arc::clone(&self.schema),
            observer: Arc::clone(&self.observer),
            cursors: self.cursors.clone(),
            leases: self.leases.clone(),
            config: Arc::new(WorkerConfig {
                stream_name: self.config.stream_name.clone(),
                batch_size: self.config.batch_size,
                idle_backoff_base: self.config.idle_backoff_base,
                idle_backoff_max: self.config.idle_backoff_max,
            }),
            cancel: cancel.child_token(),
        };
        let poller = Poller::new(
            self.source.clone(),
            self.config.stream_name.clone(),
            self.leases.clone(),
        );

        let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();
        let mut stats = SchedulerStats::default();
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            stream_name = self.config.stream_name,
            pool_size = self.leases.capacity(),
            tick_interval_ms = self.config.tick_interval.as_millis(),
            "Starting scheduler"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = workers.join_next() => {
                    record_exit(joined, &mut stats);
                }

                _ = ticker.tick() => {
                    stats.ticks += 1;
                    let mut launcher = WorkerLauncher { workers: &mut workers, ctx: &ctx };
                    let polled = tokio::select! {
                        _ = cancel.cancelled() => break,
                        polled = poller.poll(&mut launcher) => polled,
                    };
                    match polled {
                        Ok(summary) => {
                            stats.workers_started += summary.started.len() as u64;
                            debug!(
                                listed = summary.listed,
                                started = summary.started.len(),
                                deferred = summary.deferred,
                                active = self.leases.len(),
                                "Poll complete"
                            );
                        }
                        Err(e) => {
                            stats.failed_ticks += 1;
                            error!(?e, "Failed to list partitions, abandoning tick");
                        }
                    }
                }
            }
        }

        self.shutdown(workers, &mut stats).await;
        info!(?stats, "Scheduler stopped");
        Ok(stats)
    }

    async fn shutdown(&self, mut workers: JoinSet<WorkerOutcome>, stats: &mut SchedulerStats) {
        info!(
            active = workers.len(),
            timeout_ms = self.config.shutdown_timeout.as_millis(),
            "Waiting for shard workers to stop"
        );

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(joined) = workers.join_next().await {
                record_exit(joined, stats);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Shard workers did not stop in time, aborting"
            );
            self.leases.revoke_all();
            workers.abort_all();
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined
                    && !e.is_cancelled()
                {
                    error!(?e, "Shard worker panicked during shutdown");
                }
            }
        }
    }
}

fn record_exit(
    joined: std::result::Result<WorkerOutcome, tokio::task::JoinError>,
    stats: &mut SchedulerStats,
) {
    match joined {
        Ok(WorkerOutcome {
            result: Ok(WorkerExit::NotAdmitted),
            ..
        }) => {}
        Ok(WorkerOutcome {
            partition,
            result: Ok(exit),
        }) => {
            debug!(shard_id = %partition, ?exit, "Shard worker exited");
        }
        Ok(WorkerOutcome {
            partition,
            result: Err(e),
        }) => {
            stats.worker_failures += 1;
            error!(
                shard_id = %partition,
                ?e,
                "Shard worker failed, partition will be re-admitted on a later tick"
            );
        }
        Err(e) => {
            stats.worker_failures += 1;
            error!(error = ?crate::Error::from(e), "Shard worker task failed");
        }
    }
}
