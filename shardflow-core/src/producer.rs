//! Demo producer: writes a schema-encoded record to the stream at a fixed interval.
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde_json::json;
use shardflow_glue::codec::GlueAvroCodec;
use shardflow_kinesis::sink::{KinesisSink, KinesisSinkMessage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::codec::SchemaHandle;

/// Schema of the demo records.
pub const DEMO_SCHEMA: &str = r#"{"type":"record","name":"DemoRecord","namespace":"shardflow.demo","fields":[{"name":"demo","type":"string"}]}"#;

const PARTITION_KEYS: u32 = 10;

pub fn demo_message(seq: u64) -> serde_json::Value {
    json!({ "demo": format!("Message {seq}") })
}

fn partition_key() -> String {
    format!(
        "partition-key-{}",
        rand::rng().random_range(0..PARTITION_KEYS)
    )
}

pub struct Producer {
    sink: KinesisSink,
    codec: GlueAvroCodec,
    schema: SchemaHandle,
    interval: Duration,
}

impl Producer {
    pub fn new(
        sink: KinesisSink,
        codec: GlueAvroCodec,
        schema: SchemaHandle,
        interval: Duration,
    ) -> Self {
        Self {
            sink,
            codec,
            schema,
            interval,
        }
    }

    /// Encodes and writes one message. Returns how many records were accepted.
    pub async fn send(&self, message: &serde_json::Value) -> Result<u64> {
        let data = self.codec.encode(self.schema.version_id, message).await?;
        let responses = self
            .sink
            .put_records(vec![KinesisSinkMessage {
                partition_key: partition_key(),
                data: Bytes::from(data),
            }])
            .await?;

        let mut accepted = 0;
        for response in responses {
            match response.status {
                Ok((shard_id, sequence_number)) => {
                    accepted += 1;
                    info!(
                        %message,
                        shard_id,
                        sequence_number,
                        partition_key = response.partition_key,
                        "Record sent"
                    );
                }
                Err(e) => warn!(?e, partition_key = response.partition_key, "Record rejected"),
            }
        }
        Ok(accepted)
    }

    /// Sends a numbered demo message every interval until cancelled. Transient failures are
    /// logged and skipped.
    pub async fn run(&self, cancel: CancellationToken) -> Result<u64> {
        let mut ticker = tokio::time::interval(self.interval);
        let mut seq = 0u64;
        let mut sent = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let message = demo_message(seq);
                    seq += 1;
                    match self.send(&message).await {
                        Ok(accepted) => sent += accepted,
                        Err(e) if e.is_transient() => warn!(?e, "Failed to send record"),
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        info!(sent, "Producer stopped");
        Ok(sent)
    }
}
