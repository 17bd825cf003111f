//! Record decoding and the collaborators around it.
use uuid::Uuid;

use crate::Result;
use crate::upstream::{Marker, PartitionId};

pub(crate) mod glue;

/// A resolved schema version, used as the reader schema when decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHandle {
    pub version_id: Uuid,
    pub definition: String,
}

/// Output of a [RecordCodec]. Handed to the [Observer] right away and never buffered.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub value: serde_json::Value,
}

/// Turns a raw record payload into a [DecodedMessage].
#[trait_variant::make(Send)]
pub trait RecordCodec: Clone + Send + Sync + 'static {
    /// Fails with [crate::Error::Decode] on a malformed payload or a schema mismatch.
    async fn decode(&self, payload: &[u8], schema: &SchemaHandle) -> Result<DecodedMessage>;
}

/// Schema lookups, used at startup and by the tooling commands.
#[trait_variant::make(Send)]
pub trait SchemaRegistry: Send + Sync {
    /// Latest version of the named schema.
    async fn latest(&self, name: &str) -> Result<SchemaHandle>;

    /// Creates the schema if missing, otherwise registers `definition` as a version of it.
    async fn get_or_register(&self, name: &str, definition: &str) -> Result<SchemaHandle>;

    async fn by_version_id(&self, version_id: Uuid) -> Result<SchemaHandle>;
}

/// Receives every decoded message. Must not block.
pub trait Observer: Send + Sync + 'static {
    fn observe(&self, message: DecodedMessage, partition: &PartitionId, marker: &Marker);
}

/// Emits each decoded message as a structured log event.
#[derive(Debug, Default, Clone)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&self, message: DecodedMessage, partition: &PartitionId, marker: &Marker) {
        tracing::info!(
            shard_id = %partition,
            sequence_number = %marker,
            message = %message.value,
            "Received record"
        );
    }
}
