//! The partitioned, append-only log the scheduler consumes from.
//!
//! [ShardSource] is the seam between the scheduler and the upstream service. The Kinesis
//! implementation lives in [kinesis].
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::Result;

pub(crate) mod kinesis;

/// Opaque identifier of a partition (a Kinesis shard id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(Arc<str>);

impl PartitionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(value: &str) -> Self {
        PartitionId(Arc::from(value))
    }
}

impl From<String> for PartitionId {
    fn from(value: String) -> Self {
        PartitionId(Arc::from(value))
    }
}

/// Position of a record within its partition (a Kinesis sequence number).
///
/// Sequence numbers are decimal strings of up to 128 bits without leading zeros, so they order
/// by length first and lexicographically second.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Marker(Arc<str>);

impl Marker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for Marker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Marker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Marker {
    fn from(value: &str) -> Self {
        Marker(Arc::from(value))
    }
}

impl From<String> for Marker {
    fn from(value: String) -> Self {
        Marker(Arc::from(value))
    }
}

/// Where an iterator should be positioned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PositionSpec {
    /// The newest position, skipping the partition's history.
    Latest,
    AfterMarker(Marker),
    AtMarker(Marker),
}

/// Positioned read handle issued by the upstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IteratorHandle {
    pub partition: PartitionId,
    pub token: String,
}

/// A raw record, consumed transiently by a worker.
#[derive(Clone, Debug)]
pub struct Record {
    pub partition: PartitionId,
    pub marker: Marker,
    /// `None` when upstream delivered no data for the record.
    pub payload: Option<Bytes>,
    pub arrival_time: Option<DateTime<Utc>>,
}

/// Records returned by one fetch, and the handle to read on from.
#[derive(Clone, Debug)]
pub struct Batch {
    pub records: Vec<Record>,
    /// `None` once the partition is closed and fully read.
    pub next: Option<IteratorHandle>,
}

/// Read access to a partitioned stream.
#[trait_variant::make(Send)]
pub trait ShardSource: Clone + Send + Sync + 'static {
    /// Lists the partitions currently reported by upstream, in upstream order.
    async fn list_partitions(&self, stream: &str) -> Result<Vec<PartitionId>>;

    /// Positions an iterator. `None` means upstream has nothing to read from for now.
    async fn get_iterator(
        &self,
        stream: &str,
        partition: &PartitionId,
        position: PositionSpec,
    ) -> Result<Option<IteratorHandle>>;

    /// Fetches at most `max_count` records, in partition order.
    async fn fetch_batch(&self, handle: &IteratorHandle, max_count: usize) -> Result<Batch>;
}
