//! Writes records to a Kinesis data stream with `PutRecords`.
use aws_sdk_kinesis::Client;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::PutRecordsRequestEntry;
use bytes::Bytes;

use crate::{Error, KinesisConfig, Result, extract_aws_error};

/// Largest batch a single `PutRecords` call accepts.
pub const MAX_PUT_RECORDS: usize = 500;

/// Record to be written.
#[derive(Debug, Clone)]
pub struct KinesisSinkMessage {
    pub partition_key: String,
    pub data: Bytes,
}

/// Outcome for one record of a `PutRecords` call, in request order.
#[derive(Debug)]
pub struct KinesisSinkResponse {
    pub partition_key: String,
    /// Shard and sequence number the record landed at, or the per-record failure.
    pub status: Result<(String, String)>,
}

#[derive(Clone)]
pub struct KinesisSink {
    client: Client,
    stream_name: String,
}

#[derive(Clone)]
pub struct KinesisSinkBuilder {
    config: KinesisConfig,
    stream_name: String,
    client: Option<Client>,
}

impl KinesisSinkBuilder {
    pub fn new(config: KinesisConfig, stream_name: impl Into<String>) -> Self {
        Self {
            config,
            stream_name: stream_name.into(),
            client: None,
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub async fn build(self) -> Result<KinesisSink> {
        if self.stream_name.is_empty() {
            return Err(Error::InvalidConfig("stream name is required".to_string()));
        }
        let client = match self.client {
            Some(client) => client,
            None => crate::create_kinesis_client(&self.config).await?,
        };
        Ok(KinesisSink {
            client,
            stream_name: self.stream_name,
        })
    }
}

impl KinesisSink {
    /// Writes the messages in one call. A request-level failure is returned as `Err`, per-record
    /// failures are reported in the matching [KinesisSinkResponse].
    pub async fn put_records(
        &self,
        messages: Vec<KinesisSinkMessage>,
    ) -> Result<Vec<KinesisSinkResponse>> {
        if messages.is_empty() {
            return Ok(vec![]);
        }
        if messages.len() > MAX_PUT_RECORDS {
            return Err(Error::Other(format!(
                "batch of {} exceeds the PutRecords limit of {MAX_PUT_RECORDS}",
                messages.len()
            )));
        }

        let mut entries = Vec::with_capacity(messages.len());
        for message in &messages {
            let entry = PutRecordsRequestEntry::builder()
                .partition_key(&message.partition_key)
                .data(Blob::new(message.data.to_vec()))
                .build()
                .map_err(|e| Error::Other(format!("Failed to build entry: {e}")))?;
            entries.push(entry);
        }

        let output = self
            .client
            .put_records()
            .stream_name(&self.stream_name)
            .set_records(Some(entries))
            .send()
            .await
            .map_err(|e| extract_aws_error(&e))?;

        if output.records().len() != messages.len() {
            return Err(Error::Other(format!(
                "PutRecords returned {} results for {} records",
                output.records().len(),
                messages.len()
            )));
        }

        let responses = messages
            .into_iter()
            .zip(output.records())
            .map(|(message, result)| {
                let status = match (result.error_code(), result.sequence_number()) {
                    (None, Some(sequence_number)) => Ok((
                        result.shard_id().unwrap_or_default().to_string(),
                        sequence_number.to_string(),
                    )),
                    (code, _) => Err(Error::Kinesis(format!(
                        "{}: {}",
                        code.unwrap_or("Unknown"),
                        result.error_message().unwrap_or("no error message")
                    ))),
                };
                KinesisSinkResponse {
                    partition_key: message.partition_key,
                    status,
                }
            })
            .collect();

        Ok(responses)
    }
}
