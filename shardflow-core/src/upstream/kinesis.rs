use shardflow_kinesis::source::{KinesisRecord, KinesisSource, ShardIterator, StartingPosition};

use crate::error::Error;
use crate::upstream::{Batch, IteratorHandle, PartitionId, PositionSpec, Record, ShardSource};

impl From<shardflow_kinesis::Error> for Error {
    fn from(value: shardflow_kinesis::Error) -> Self {
        match value {
            shardflow_kinesis::Error::Unavailable(_) | shardflow_kinesis::Error::ExpiredIterator(_) => {
                Error::UpstreamUnavailable(value.to_string())
            }
            shardflow_kinesis::Error::InvalidConfig(e) => Error::Config(e),
            shardflow_kinesis::Error::Kinesis(_) | shardflow_kinesis::Error::Other(_) => {
                Error::Upstream(value.to_string())
            }
        }
    }
}

impl From<PositionSpec> for StartingPosition {
    fn from(value: PositionSpec) -> Self {
        match value {
            PositionSpec::Latest => StartingPosition::Latest,
            PositionSpec::AfterMarker(marker) => {
                StartingPosition::AfterSequenceNumber(marker.as_str().to_string())
            }
            PositionSpec::AtMarker(marker) => {
                StartingPosition::AtSequenceNumber(marker.as_str().to_string())
            }
        }
    }
}

impl From<KinesisRecord> for Record {
    fn from(record: KinesisRecord) -> Self {
        Record {
            partition: record.shard_id.into(),
            marker: record.sequence_number.into(),
            payload: record.data,
            arrival_time: record.arrival_time,
        }
    }
}

impl ShardSource for KinesisSource {
    async fn list_partitions(&self, stream: &str) -> crate::Result<Vec<PartitionId>> {
        Ok(self
            .list_shards(stream)
            .await?
            .into_iter()
            .map(PartitionId::from)
            .collect())
    }

    async fn get_iterator(
        &self,
        stream: &str,
        partition: &PartitionId,
        position: PositionSpec,
    ) -> crate::Result<Option<IteratorHandle>> {
        let iterator = self
            .shard_iterator(stream, partition.as_str(), position.into())
            .await?;
        Ok(iterator.map(|it| IteratorHandle {
            partition: partition.clone(),
            token: it.iterator,
        }))
    }

    async fn fetch_batch(
        &self,
        handle: &IteratorHandle,
        max_count: usize,
    ) -> crate::Result<Batch> {
        let limit = i32::try_from(max_count)
            .map_err(|_| Error::Config(format!("batch size {max_count} is too large")))?;
        let iterator = ShardIterator {
            shard_id: handle.partition.to_string(),
            iterator: handle.token.clone(),
        };
        let batch = self.get_records(&iterator, limit).await?;
        Ok(Batch {
            records: batch.records.into_iter().map(Record::from).collect(),
            next: batch.next_shard_iterator.map(|token| IteratorHandle {
                partition: handle.partition.clone(),
                token,
            }),
        })
    }
}
