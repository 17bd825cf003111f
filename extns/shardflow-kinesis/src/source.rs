//! Reading side of a Kinesis data stream.
use aws_sdk_kinesis::Client;
use aws_sdk_kinesis::types::ShardIteratorType;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::{KinesisConfig, Result, extract_aws_error};

/// Where a new shard iterator should start reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartingPosition {
    /// Just after the most recent record in the shard.
    Latest,
    /// Right after the record with this sequence number.
    AfterSequenceNumber(String),
    /// At the record with this sequence number.
    AtSequenceNumber(String),
}

/// A positioned read handle for one shard. Kinesis iterators expire five minutes after issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIterator {
    pub shard_id: String,
    pub iterator: String,
}

/// A record as delivered by `GetRecords`.
#[derive(Debug, Clone)]
pub struct KinesisRecord {
    pub shard_id: String,
    pub sequence_number: String,
    pub partition_key: String,
    /// `None` when the record carries an empty data blob.
    pub data: Option<Bytes>,
    pub arrival_time: Option<DateTime<Utc>>,
}

/// Result of a single `GetRecords` call.
#[derive(Debug, Default)]
pub struct RecordBatch {
    pub records: Vec<KinesisRecord>,
    /// Where the next call continues. `None` once a closed shard has been fully read.
    pub next_shard_iterator: Option<String>,
}

#[derive(Clone)]
pub struct KinesisSource {
    client: Client,
}

#[derive(Clone)]
pub struct KinesisSourceBuilder {
    config: KinesisConfig,
    client: Option<Client>,
}

impl KinesisSourceBuilder {
    pub fn new(config: KinesisConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub async fn build(self) -> Result<KinesisSource> {
        let client = match self.client {
            Some(client) => client,
            None => crate::create_kinesis_client(&self.config).await?,
        };
        Ok(KinesisSource { client })
    }
}

impl KinesisSource {
    /// Lists every shard id of the stream, following `NextToken` pagination. The order is the
    /// order Kinesis reports.
    pub async fn list_shards(&self, stream_name: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        let mut shard_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // StreamName and NextToken are mutually exclusive on follow-up pages.
            let request = match &next_token {
                Some(token) => self.client.list_shards().next_token(token),
                None => self.client.list_shards().stream_name(stream_name),
            };

            let output = request.send().await.map_err(|err| {
                let err = extract_aws_error(&err);
                tracing::error!(?err, stream_name, "Failed to list shards");
                err
            })?;

            shard_ids.extend(output.shards().iter().map(|s| s.shard_id().to_string()));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        tracing::debug!(
            stream_name,
            count = shard_ids.len(),
            time_taken_ms = start.elapsed().as_millis(),
            "Listed shards"
        );
        Ok(shard_ids)
    }

    /// Requests an iterator for the shard. Returns `None` when Kinesis does not hand one out,
    /// e.g. for a closed shard that has been fully read.
    pub async fn shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        position: StartingPosition,
    ) -> Result<Option<ShardIterator>> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id);

        let request = match position {
            StartingPosition::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            StartingPosition::AfterSequenceNumber(sequence_number) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence_number),
            StartingPosition::AtSequenceNumber(sequence_number) => request
                .shard_iterator_type(ShardIteratorType::AtSequenceNumber)
                .starting_sequence_number(sequence_number),
        };

        let output = request.send().await.map_err(|err| {
            let err = extract_aws_error(&err);
            tracing::warn!(?err, stream_name, shard_id, "Failed to get shard iterator");
            err
        })?;

        Ok(output.shard_iterator().map(|iterator| ShardIterator {
            shard_id: shard_id.to_string(),
            iterator: iterator.to_string(),
        }))
    }

    /// Fetches at most `limit` records from the iterator position.
    pub async fn get_records(&self, iterator: &ShardIterator, limit: i32) -> Result<RecordBatch> {
        let start = Instant::now();
        let output = self
            .client
            .get_records()
            .shard_iterator(&iterator.iterator)
            .limit(limit)
            .send()
            .await
            .map_err(|err| extract_aws_error(&err))?;

        let records: Vec<KinesisRecord> = output
            .records()
            .iter()
            .map(|record| {
                let data = record.data().as_ref();
                KinesisRecord {
                    shard_id: iterator.shard_id.clone(),
                    sequence_number: record.sequence_number().to_string(),
                    partition_key: record.partition_key().to_string(),
                    data: (!data.is_empty()).then(|| Bytes::copy_from_slice(data)),
                    arrival_time: record
                        .approximate_arrival_timestamp()
                        .and_then(|ts| ts.to_millis().ok())
                        .and_then(DateTime::<Utc>::from_timestamp_millis),
                }
            })
            .collect();

        tracing::debug!(
            shard_id = iterator.shard_id,
            count = records.len(),
            requested_count = limit,
            millis_behind_latest = output.millis_behind_latest(),
            time_taken_ms = start.elapsed().as_millis(),
            "Got records from kinesis"
        );

        Ok(RecordBatch {
            records,
            next_shard_iterator: output.next_shard_iterator().map(str::to_string),
        })
    }
}
