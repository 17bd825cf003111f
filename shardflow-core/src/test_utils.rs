//! Test doubles for the scheduler's collaborators.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::Result;
use crate::codec::{DecodedMessage, Observer, RecordCodec, SchemaHandle};
use crate::error::Error;
use crate::upstream::{
    Batch, IteratorHandle, Marker, PartitionId, PositionSpec, Record, ShardSource,
};

pub(crate) fn schema_handle() -> SchemaHandle {
    SchemaHandle {
        version_id: Uuid::from_u128(0x1b2c_3d4e_5f60_4718_8a9b_0c1d_2e3f_4a5b),
        definition: crate::producer::DEMO_SCHEMA.to_string(),
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
struct Shard {
    records: Vec<Record>,
    positions: Vec<PositionSpec>,
    fetch_sizes: Vec<usize>,
    fetch_errors: VecDeque<Error>,
    fetch_attempts: usize,
    withheld_iterators: usize,
    blocked: bool,
}

#[derive(Default)]
struct SourceState {
    listing: Vec<PartitionId>,
    list_errors: VecDeque<Error>,
    shards: HashMap<PartitionId, Shard>,
}

/// Per-shard in-memory record logs. Iterator tokens are indexes into a shard's log.
#[derive(Clone, Default)]
pub(crate) struct InMemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl InMemorySource {
    pub(crate) fn new<'a>(shards: impl IntoIterator<Item = &'a str>) -> Self {
        let source = Self::default();
        source.set_listing(shards);
        source
    }

    /// Replaces the partitions reported by the next listings.
    pub(crate) fn set_listing<'a>(&self, shards: impl IntoIterator<Item = &'a str>) {
        let mut state = self.state.lock();
        state.listing = shards.into_iter().map(PartitionId::from).collect();
        for pid in state.listing.clone() {
            state.shards.entry(pid).or_default();
        }
    }

    pub(crate) fn append(&self, shard: &str, sequence: u32, payload: Option<Bytes>) {
        let pid = PartitionId::from(shard);
        self.state
            .lock()
            .shards
            .entry(pid.clone())
            .or_default()
            .records
            .push(Record {
                partition: pid,
                marker: Marker::from(sequence.to_string()),
                payload,
                arrival_time: None,
            });
    }

    pub(crate) fn fail_next_list(&self, error: Error) {
        self.state.lock().list_errors.push_back(error);
    }

    pub(crate) fn fail_next_fetch(&self, shard: &str, error: Error) {
        self.state
            .lock()
            .shards
            .entry(PartitionId::from(shard))
            .or_default()
            .fetch_errors
            .push_back(error);
    }

    /// The next `count` iterator requests for the shard get no iterator.
    pub(crate) fn withhold_iterators(&self, shard: &str, count: usize) {
        self.state
            .lock()
            .shards
            .entry(PartitionId::from(shard))
            .or_default()
            .withheld_iterators = count;
    }

    /// Fetches on the shard hang forever from now on.
    pub(crate) fn block_fetches(&self, shard: &str) {
        self.state
            .lock()
            .shards
            .entry(PartitionId::from(shard))
            .or_default()
            .blocked = true;
    }

    /// Number of fetches started on the shard, including failed and hanging ones.
    pub(crate) fn fetch_attempts(&self, shard: &str) -> usize {
        self.state
            .lock()
            .shards
            .get(&PartitionId::from(shard))
            .map(|s| s.fetch_attempts)
            .unwrap_or_default()
    }

    /// Every position an iterator was requested at, oldest first.
    pub(crate) fn positions(&self, shard: &str) -> Vec<PositionSpec> {
        self.state
            .lock()
            .shards
            .get(&PartitionId::from(shard))
            .map(|s| s.positions.clone())
            .unwrap_or_default()
    }

    /// Number of records returned by each fetch, oldest first.
    pub(crate) fn fetch_sizes(&self, shard: &str) -> Vec<usize> {
        self.state
            .lock()
            .shards
            .get(&PartitionId::from(shard))
            .map(|s| s.fetch_sizes.clone())
            .unwrap_or_default()
    }
}

impl ShardSource for InMemorySource {
    async fn list_partitions(&self, _stream: &str) -> Result<Vec<PartitionId>> {
        let mut state = self.state.lock();
        if let Some(error) = state.list_errors.pop_front() {
            return Err(error);
        }
        Ok(state.listing.clone())
    }

    async fn get_iterator(
        &self,
        _stream: &str,
        partition: &PartitionId,
        position: PositionSpec,
    ) -> Result<Option<IteratorHandle>> {
        let mut state = self.state.lock();
        let shard = state
            .shards
            .get_mut(partition)
            .ok_or_else(|| Error::Upstream(format!("ResourceNotFoundException: {partition}")))?;
        shard.positions.push(position.clone());

        if shard.withheld_iterators > 0 {
            shard.withheld_iterators -= 1;
            return Ok(None);
        }

        let index = match &position {
            PositionSpec::Latest => shard.records.len(),
            PositionSpec::AfterMarker(marker) => shard
                .records
                .iter()
                .position(|r| r.marker > *marker)
                .unwrap_or(shard.records.len()),
            PositionSpec::AtMarker(marker) => shard
                .records
                .iter()
                .position(|r| r.marker >= *marker)
                .unwrap_or(shard.records.len()),
        };
        Ok(Some(IteratorHandle {
            partition: partition.clone(),
            token: index.to_string(),
        }))
    }

    async fn fetch_batch(&self, handle: &IteratorHandle, max_count: usize) -> Result<Batch> {
        let blocked = {
            let mut state = self.state.lock();
            let shard = state
                .shards
                .get_mut(&handle.partition)
                .ok_or_else(|| Error::Upstream(format!("unknown shard {}", handle.partition)))?;
            shard.fetch_attempts += 1;
            if let Some(error) = shard.fetch_errors.pop_front() {
                return Err(error);
            }
            shard.blocked
        };
        if blocked {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        let shard = state
            .shards
            .get_mut(&handle.partition)
            .ok_or_else(|| Error::Upstream(format!("unknown shard {}", handle.partition)))?;
        let start: usize = handle
            .token
            .parse()
            .map_err(|_| Error::UpstreamUnavailable("expired iterator".to_string()))?;
        let records: Vec<Record> = shard
            .records
            .iter()
            .skip(start)
            .take(max_count)
            .cloned()
            .collect();
        shard.fetch_sizes.push(records.len());
        let next = IteratorHandle {
            partition: handle.partition.clone(),
            token: (start + records.len()).to_string(),
        };
        Ok(Batch {
            records,
            next: Some(next),
        })
    }
}

#[derive(Default)]
struct CodecState {
    decoded: usize,
    fail_once: HashSet<Bytes>,
}

/// Decodes JSON payloads. Anything else is a decode error.
#[derive(Clone, Default)]
pub(crate) struct JsonCodec {
    state: Arc<Mutex<CodecState>>,
}

impl JsonCodec {
    /// The next decode of exactly this payload fails.
    pub(crate) fn fail_once_on(&self, payload: &Bytes) {
        self.state.lock().fail_once.insert(payload.clone());
    }

    pub(crate) fn decoded(&self) -> usize {
        self.state.lock().decoded
    }
}

impl RecordCodec for JsonCodec {
    async fn decode(&self, payload: &[u8], _schema: &SchemaHandle) -> Result<DecodedMessage> {
        let mut state = self.state.lock();
        if state.fail_once.remove(payload) {
            return Err(Error::Decode("injected decode failure".to_string()));
        }
        let value = serde_json::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
        state.decoded += 1;
        Ok(DecodedMessage { value })
    }
}

/// Keeps every observed message.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    messages: Mutex<Vec<(serde_json::Value, PartitionId, Marker)>>,
}

impl RecordingObserver {
    pub(crate) fn messages(&self) -> Vec<(serde_json::Value, PartitionId, Marker)> {
        self.messages.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, message: DecodedMessage, partition: &PartitionId, marker: &Marker) {
        self.messages
            .lock()
            .push((message.value, partition.clone(), marker.clone()));
    }
}
