//! Per-partition consumer loop.
//!
//! A worker is spawned in a gated state and only starts once the poller confirms its admission to
//! the [LeaseTable]. From then on it loops: read the cursor, position an iterator, fetch a batch,
//! decode and emit every record, advance the cursor. It ends on cancellation or on the first fatal
//! error, and it releases its lease on every exit path.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::codec::{Observer, RecordCodec, SchemaHandle};
use crate::cursor::CursorStore;
use crate::error::Error;
use crate::idle::IdleBackoff;
use crate::lease::{LeaseGuard, LeaseTable};
use crate::upstream::{Batch, IteratorHandle, Marker, PartitionId, PositionSpec, ShardSource};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_name: String,
    /// Upper bound of records per fetch.
    pub batch_size: usize,
    pub idle_backoff_base: Duration,
    pub idle_backoff_max: Duration,
}

/// Everything a worker shares with its siblings.
pub struct WorkerContext<S, C> {
    pub source: S,
    pub codec: C,
    pub schema: Arc<SchemaHandle>,
    pub observer: Arc<dyn Observer>,
    pub cursors: CursorStore,
    pub leases: LeaseTable,
    pub config: Arc<WorkerConfig>,
    pub cancel: CancellationToken,
}

impl<S: Clone, C: Clone> Clone for WorkerContext<S, C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            codec: self.codec.clone(),
            schema: Arc::clone(&self.schema),
            observer: Arc::clone(&self.observer),
            cursors: self.cursors.clone(),
            leases: self.leases.clone(),
            config: Arc::clone(&self.config),
            cancel: self.cancel.clone(),
        }
    }
}

/// How a worker ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Admission was refused, the worker never ran.
    NotAdmitted,
    Cancelled,
}

/// What the driver collects from a finished worker.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub partition: PartitionId,
    pub result: Result<WorkerExit>,
}

/// Sends the go-ahead to a gated worker once its lease is in place.
pub type StartGate = oneshot::Sender<()>;

pub struct ShardWorker<S, C> {
    partition: PartitionId,
    ctx: WorkerContext<S, C>,
}

impl<S, C> ShardWorker<S, C>
where
    S: ShardSource,
    C: RecordCodec,
{
    pub fn new(partition: PartitionId, ctx: WorkerContext<S, C>) -> Self {
        Self { partition, ctx }
    }

    /// Waits for `start`, then consumes the partition until cancelled or failed. If `start` is
    /// dropped the worker exits without touching the lease table.
    pub async fn run(self, start: oneshot::Receiver<()>) -> WorkerOutcome {
        let partition = self.partition.clone();

        if start.await.is_err() {
            debug!(shard_id = %partition, "Worker not admitted");
            return WorkerOutcome {
                partition,
                result: Ok(WorkerExit::NotAdmitted),
            };
        }

        if !self.ctx.leases.has_lease(&partition) {
            return WorkerOutcome {
                result: Err(Error::Lease(format!(
                    "worker started for {partition} without holding its lease"
                ))),
                partition,
            };
        }

        let guard = LeaseGuard::new(self.ctx.leases.clone(), partition.clone());
        info!(shard_id = %partition, "Started shard worker");

        let result = self.consume().await;
        guard.release();

        match &result {
            Ok(exit) => info!(shard_id = %partition, ?exit, "Shard worker stopped"),
            Err(e) => error!(shard_id = %partition, ?e, "Shard worker failed"),
        }
        WorkerOutcome { partition, result }
    }

    async fn consume(&self) -> Result<WorkerExit> {
        let mut idle = IdleBackoff::new(
            self.ctx.config.idle_backoff_base,
            self.ctx.config.idle_backoff_max,
        );

        // where the initial Latest iterator left off, used until the first cursor is persisted
        let mut resume: Option<IteratorHandle> = None;

        loop {
            if self.ctx.cancel.is_cancelled() {
                return Ok(WorkerExit::Cancelled);
            }

            let seen = match self.cycle(&mut resume).await {
                Ok(seen) => seen,
                Err(e) if e.is_transient() => {
                    warn!(shard_id = %self.partition, ?e, "Fetch cycle made no progress");
                    0
                }
                Err(e) => return Err(e),
            };

            if seen > 0 {
                idle.reset();
                continue;
            }

            let delay = idle.next_delay();
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Ok(WorkerExit::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One fetch cycle. Returns the number of records seen, skipped ones included.
    ///
    /// With a cursor the iterator is positioned right after it. Without one the worker starts at
    /// Latest once and then keeps following that iterator through `resume`, so records written
    /// while it idles are not skipped.
    async fn cycle(&self, resume: &mut Option<IteratorHandle>) -> Result<usize> {
        let start = Instant::now();
        let cursor = self.ctx.cursors.get(&self.partition);
        let handle = match (cursor, resume.take()) {
            (None, Some(handle)) => Some(handle),
            (Some(marker), _) => self.position(PositionSpec::AfterMarker(marker)).await?,
            (None, None) => self.position(PositionSpec::Latest).await?,
        };
        let Some(handle) = handle else {
            debug!(shard_id = %self.partition, "No iterator available");
            return Ok(0);
        };

        let Batch { records, next } = self
            .ctx
            .source
            .fetch_batch(&handle, self.ctx.config.batch_size)
            .await?;
        *resume = next;

        let count = records.len();
        let mut last_seen: Option<Marker> = None;
        let mut last_arrival: Option<DateTime<Utc>> = None;
        for record in records {
            match &record.payload {
                Some(payload) => {
                    let message = self.ctx.codec.decode(payload, &self.ctx.schema).await?;
                    self.ctx
                        .observer
                        .observe(message, &record.partition, &record.marker);
                }
                None => debug!(
                    shard_id = %self.partition,
                    sequence_number = %record.marker,
                    "Skipping record without payload"
                ),
            }
            last_arrival = record.arrival_time.or(last_arrival);
            last_seen = Some(record.marker);
        }

        if let Some(marker) = last_seen {
            self.ctx.cursors.set(self.partition.clone(), marker);
            debug!(
                shard_id = %self.partition,
                count,
                lag_ms = last_arrival.map(|t| (Utc::now() - t).num_milliseconds()),
                time_taken_ms = start.elapsed().as_millis(),
                "Processed batch"
            );
        }
        Ok(count)
    }

    async fn position(&self, position: PositionSpec) -> Result<Option<IteratorHandle>> {
        self.ctx
            .source
            .get_iterator(&self.ctx.config.stream_name, &self.partition, position)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::test_utils::{InMemorySource, JsonCodec, RecordingObserver, wait_until};

    const SHARD: &str = "shardId-000000000000";

    struct Harness {
        source: InMemorySource,
        codec: JsonCodec,
        observer: Arc<RecordingObserver>,
        cursors: CursorStore,
        leases: LeaseTable,
        cancel: CancellationToken,
        tasks: JoinSet<WorkerOutcome>,
        idle_backoff: (Duration, Duration),
    }

    impl Harness {
        fn new() -> Self {
            Self {
                source: InMemorySource::new([SHARD]),
                codec: JsonCodec::default(),
                observer: Arc::new(RecordingObserver::default()),
                cursors: CursorStore::new(),
                leases: LeaseTable::new(2),
                cancel: CancellationToken::new(),
                tasks: JoinSet::new(),
                idle_backoff: (Duration::from_millis(5), Duration::from_millis(20)),
            }
        }

        fn ctx(&self, batch_size: usize) -> WorkerContext<InMemorySource, JsonCodec> {
            WorkerContext {
                source: self.source.clone(),
                codec: self.codec.clone(),
                schema: Arc::new(crate::test_utils::schema_handle()),
                observer: Arc::clone(&self.observer) as Arc<dyn Observer>,
                cursors: self.cursors.clone(),
                leases: self.leases.clone(),
                config: Arc::new(WorkerConfig {
                    stream_name: "stream".to_string(),
                    batch_size,
                    idle_backoff_base: self.idle_backoff.0,
                    idle_backoff_max: self.idle_backoff.1,
                }),
                cancel: self.cancel.clone(),
            }
        }

        /// Spawns, admits and starts a worker for `partition`.
        fn start(&mut self, partition: &str, batch_size: usize) {
            let (tx, rx) = oneshot::channel();
            let worker = ShardWorker::new(PartitionId::from(partition), self.ctx(batch_size));
            let handle = self.tasks.spawn(worker.run(rx));
            assert!(self.leases.try_admit(PartitionId::from(partition), handle));
            tx.send(()).unwrap();
        }

        async fn next_outcome(&mut self) -> WorkerOutcome {
            tokio::time::timeout(Duration::from_secs(5), self.tasks.join_next())
                .await
                .expect("worker did not finish")
                .unwrap()
                .unwrap()
        }
    }

    fn pid() -> PartitionId {
        PartitionId::from(SHARD)
    }

    fn json_payload(n: u32) -> Option<Bytes> {
        Some(Bytes::from(json!({"demo": format!("Message {n}")}).to_string()))
    }

    #[test_log::test(tokio::test)]
    async fn test_processes_records_in_order_and_advances_cursor() {
        let mut h = Harness::new();
        h.cursors.set(pid(), Marker::from("1"));
        for seq in [5u32, 7, 9] {
            h.source.append(SHARD, seq, json_payload(seq));
        }

        h.start(SHARD, 2);
        wait_until(|| h.observer.len() == 3).await;
        wait_until(|| h.cursors.get(&pid()) == Some(Marker::from("9"))).await;

        let markers: Vec<String> = h
            .observer
            .messages()
            .into_iter()
            .map(|(_, _, marker)| marker.to_string())
            .collect();
        assert_eq!(markers, vec!["5", "7", "9"]);
        // batch size 2 splits the three records over two fetches
        assert!(h.source.fetch_sizes(SHARD).starts_with(&[2, 1]));

        h.cancel.cancel();
        let outcome = h.next_outcome().await;
        assert!(matches!(outcome.result, Ok(WorkerExit::Cancelled)));
        assert!(!h.leases.has_lease(&pid()));
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_payload_still_advances_cursor() {
        let mut h = Harness::new();
        h.cursors.set(pid(), Marker::from("1"));
        h.source.append(SHARD, 3, None);
        h.source.append(SHARD, 4, None);

        h.start(SHARD, 10);
        wait_until(|| h.cursors.get(&pid()) == Some(Marker::from("4"))).await;
        assert_eq!(h.observer.len(), 0);
        assert_eq!(h.codec.decoded(), 0);

        h.cancel.cancel();
        h.next_outcome().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_starts_from_latest_without_cursor() {
        let mut h = Harness::new();
        h.source.append(SHARD, 5, json_payload(5));

        h.start(SHARD, 10);
        wait_until(|| !h.source.positions(SHARD).is_empty()).await;
        assert_eq!(h.source.positions(SHARD)[0], PositionSpec::Latest);

        h.cancel.cancel();
        h.next_outcome().await;
        assert_eq!(h.observer.len(), 0);
        assert_eq!(h.cursors.get(&pid()), None);
    }

    #[test_log::test(tokio::test)]
    async fn test_records_written_while_idle_without_cursor_are_delivered() {
        let mut h = Harness::new();
        h.idle_backoff = (Duration::from_millis(200), Duration::from_secs(5));

        h.start(SHARD, 10);
        wait_until(|| h.source.fetch_sizes(SHARD).len() == 1).await;
        for seq in [5u32, 7, 9] {
            h.source.append(SHARD, seq, json_payload(seq));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        wait_until(|| h.cursors.get(&pid()) == Some(Marker::from("9"))).await;
        let markers: Vec<String> = h
            .observer
            .messages()
            .into_iter()
            .map(|(_, _, marker)| marker.to_string())
            .collect();
        assert_eq!(markers, vec!["5", "7", "9"]);
        let latest = h
            .source
            .positions(SHARD)
            .into_iter()
            .filter(|p| *p == PositionSpec::Latest)
            .count();
        assert_eq!(latest, 1);

        h.cancel.cancel();
        h.next_outcome().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_decode_failure_releases_lease_and_keeps_cursor() {
        let mut h = Harness::new();
        h.cursors.set(pid(), Marker::from("1"));
        h.source.append(SHARD, 3, json_payload(3));
        h.source.append(SHARD, 5, Some(Bytes::from_static(b"{not json")));
        h.source.append(SHARD, 7, json_payload(7));

        h.start(SHARD, 1);
        let outcome = h.next_outcome().await;
        assert_eq!(outcome.partition, pid());
        assert!(matches!(outcome.result, Err(Error::Decode(_))));
        assert!(!h.leases.has_lease(&pid()));
        assert_eq!(h.cursors.get(&pid()), Some(Marker::from("3")));
        assert_eq!(h.observer.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_restart_resumes_from_persisted_cursor() {
        let mut h = Harness::new();
        h.cursors.set(pid(), Marker::from("1"));
        for seq in [5u32, 7, 9] {
            h.source.append(SHARD, seq, json_payload(seq));
        }
        h.codec.fail_once_on(&json_payload(9).unwrap());

        // the whole batch is fetched, 9 fails before the cursor is persisted
        h.start(SHARD, 10);
        let outcome = h.next_outcome().await;
        assert!(matches!(outcome.result, Err(Error::Decode(_))));
        assert_eq!(h.cursors.get(&pid()), Some(Marker::from("1")));

        h.start(SHARD, 10);
        wait_until(|| h.cursors.get(&pid()) == Some(Marker::from("9"))).await;
        assert_eq!(
            h.source.positions(SHARD)[1],
            PositionSpec::AfterMarker(Marker::from("1"))
        );

        let markers: Vec<String> = h
            .observer
            .messages()
            .into_iter()
            .map(|(_, _, marker)| marker.to_string())
            .collect();
        assert_eq!(markers, vec!["5", "7", "5", "7", "9"]);

        h.cancel.cancel();
        h.next_outcome().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_transient_errors_are_retried() {
        let mut h = Harness::new();
        h.cursors.set(pid(), Marker::from("1"));
        h.source.append(SHARD, 2, json_payload(2));
        h.source
            .fail_next_fetch(SHARD, Error::UpstreamUnavailable("throttled".to_string()));
        h.source
            .fail_next_fetch(SHARD, Error::UpstreamUnavailable("expired iterator".to_string()));

        h.start(SHARD, 10);
        wait_until(|| h.observer.len() == 1).await;
        assert!(h.leases.has_lease(&pid()));

        h.cancel.cancel();
        let outcome = h.next_outcome().await;
        assert!(matches!(outcome.result, Ok(WorkerExit::Cancelled)));
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_iterator_is_not_an_error() {
        let mut h = Harness::new();
        h.cursors.set(pid(), Marker::from("1"));
        h.source.withhold_iterators(SHARD, 2);
        h.source.append(SHARD, 2, json_payload(2));

        h.start(SHARD, 10);
        wait_until(|| h.observer.len() == 1).await;
        assert!(h.source.positions(SHARD).len() >= 3);

        h.cancel.cancel();
        h.next_outcome().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_fatal_upstream_error_releases_lease() {
        let mut h = Harness::new();
        h.source
            .fail_next_fetch(SHARD, Error::Upstream("AccessDeniedException".to_string()));

        h.start(SHARD, 10);
        let outcome = h.next_outcome().await;
        assert!(matches!(outcome.result, Err(Error::Upstream(_))));
        assert!(h.leases.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_refused_admission_does_not_touch_leases() {
        let mut h = Harness::new();
        let (tx, rx) = oneshot::channel::<()>();
        let worker = ShardWorker::new(pid(), h.ctx(10));
        let handle = h.tasks.spawn(worker.run(rx));

        // someone else holds the lease, this worker is turned away
        let (_other_tx, other_rx) = oneshot::channel::<()>();
        let other = ShardWorker::new(pid(), h.ctx(10));
        let other_handle = h.tasks.spawn(other.run(other_rx));
        assert!(h.leases.try_admit(pid(), other_handle));
        assert!(!h.leases.try_admit(pid(), handle));
        drop(tx);

        let outcome = h.next_outcome().await;
        assert!(matches!(outcome.result, Ok(WorkerExit::NotAdmitted)));
        assert!(h.leases.has_lease(&pid()));
        assert!(h.source.positions(SHARD).is_empty());
        h.tasks.abort_all();
    }

    #[test_log::test(tokio::test)]
    async fn test_start_without_lease_is_a_lease_error() {
        let mut h = Harness::new();
        let (tx, rx) = oneshot::channel();
        let worker = ShardWorker::new(pid(), h.ctx(10));
        h.tasks.spawn(worker.run(rx));
        tx.send(()).unwrap();

        let outcome = h.next_outcome().await;
        assert!(matches!(outcome.result, Err(Error::Lease(_))));
    }
}
