//! Avro codec for the Glue Schema Registry wire format.
//!
//! Every payload starts with an 18 byte header: the version byte `3`, a compression byte (`0` for
//! none, `5` for zlib) and the 16 byte UUID of the writer's schema version. The Avro datum follows,
//! zlib-deflated when the compression byte says so.
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use apache_avro::Schema;
use apache_avro::types::Value;
use flate2::read::ZlibDecoder;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::registry::{GlueRegistry, SchemaVersion};
use crate::{Error, Result};

pub const HEADER_VERSION_BYTE: u8 = 3;
pub const COMPRESSION_NONE_BYTE: u8 = 0;
pub const COMPRESSION_ZLIB_BYTE: u8 = 5;
pub const HEADER_LEN: usize = 18;
/// Upper bound of an inflated datum, the largest record Kinesis accepts.
pub const MAX_INFLATED_LEN: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub compression: Compression,
    pub schema_version_id: Uuid,
}

impl WireHeader {
    /// Splits a payload into its header and the (possibly compressed) datum.
    pub fn parse(payload: &[u8]) -> Result<(Self, &[u8])> {
        let (header, body) = payload.split_at_checked(HEADER_LEN).ok_or_else(|| {
            Error::Decode(format!(
                "payload of {} bytes is shorter than the {HEADER_LEN} byte header",
                payload.len()
            ))
        })?;

        let [version, compression, id @ ..] = header else {
            return Err(Error::Decode("truncated header".to_string()));
        };
        if *version != HEADER_VERSION_BYTE {
            return Err(Error::Decode(format!("unsupported header version {version}")));
        }
        let compression = match *compression {
            COMPRESSION_NONE_BYTE => Compression::None,
            COMPRESSION_ZLIB_BYTE => Compression::Zlib,
            other => return Err(Error::Decode(format!("unsupported compression {other}"))),
        };
        let schema_version_id =
            Uuid::from_slice(id).map_err(|e| Error::Decode(format!("invalid schema id: {e}")))?;

        Ok((
            WireHeader {
                compression,
                schema_version_id,
            },
            body,
        ))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(HEADER_VERSION_BYTE);
        out.push(match self.compression {
            Compression::None => COMPRESSION_NONE_BYTE,
            Compression::Zlib => COMPRESSION_ZLIB_BYTE,
        });
        out.extend_from_slice(self.schema_version_id.as_bytes());
    }
}

/// Decodes and encodes Glue framed Avro records. Parsed schemas are cached by version id for the
/// lifetime of the codec, so the registry is consulted once per writer schema.
#[derive(Clone)]
pub struct GlueAvroCodec {
    registry: GlueRegistry,
    schemas: Arc<RwLock<HashMap<Uuid, Arc<Schema>>>>,
}

impl GlueAvroCodec {
    pub fn new(registry: GlueRegistry) -> Self {
        Self {
            registry,
            schemas: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seeds the cache with an already resolved schema version.
    pub fn with_schema(self, version: &SchemaVersion) -> Result<Self> {
        let schema = parse_schema(&version.definition)?;
        self.schemas
            .write()
            .insert(version.schema_version_id, Arc::new(schema));
        Ok(self)
    }

    async fn schema(&self, schema_version_id: Uuid) -> Result<Arc<Schema>> {
        let cached = self.schemas.read().get(&schema_version_id).map(Arc::clone);
        if let Some(schema) = cached {
            return Ok(schema);
        }

        let version = self.registry.by_version_id(schema_version_id).await?;
        let schema = Arc::new(parse_schema(&version.definition)?);
        tracing::debug!(%schema_version_id, "Cached writer schema");
        self.schemas
            .write()
            .insert(schema_version_id, Arc::clone(&schema));
        Ok(schema)
    }

    /// Decodes a framed payload into JSON. When `reader` names a schema version other than the
    /// writer's, the datum is resolved into the reader schema.
    pub async fn decode(&self, payload: &[u8], reader: Option<Uuid>) -> Result<serde_json::Value> {
        let (header, body) = WireHeader::parse(payload)?;

        let inflated;
        let mut datum = match header.compression {
            Compression::None => body,
            Compression::Zlib => {
                let mut buf = Vec::with_capacity(body.len() * 2);
                ZlibDecoder::new(body)
                    .take(MAX_INFLATED_LEN as u64 + 1)
                    .read_to_end(&mut buf)
                    .map_err(|e| Error::Decode(format!("failed to inflate payload: {e}")))?;
                if buf.len() > MAX_INFLATED_LEN {
                    return Err(Error::Decode(format!(
                        "inflated payload exceeds {MAX_INFLATED_LEN} bytes"
                    )));
                }
                inflated = buf;
                inflated.as_slice()
            }
        };

        let writer = self.schema(header.schema_version_id).await?;
        let reader = match reader {
            Some(id) if id != header.schema_version_id => Some(self.schema(id).await?),
            _ => None,
        };

        let value = apache_avro::from_avro_datum(&writer, &mut datum, reader.as_deref())
            .map_err(|e| Error::Decode(format!("invalid avro datum: {e}")))?;

        serde_json::Value::try_from(value)
            .map_err(|e| Error::Decode(format!("failed to convert datum to json: {e}")))
    }

    /// Encodes `message` with the given schema version, uncompressed. A message that does not
    /// conform to the schema is rejected with [Error::Encode].
    pub async fn encode(
        &self,
        schema_version_id: Uuid,
        message: &serde_json::Value,
    ) -> Result<Vec<u8>> {
        let schema = self.schema(schema_version_id).await?;

        let value = Value::from(message.clone())
            .resolve(&schema)
            .map_err(|e| Error::Encode(format!("message does not match schema: {e}")))?;
        let datum = apache_avro::to_avro_datum(&schema, value)
            .map_err(|e| Error::Encode(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + datum.len());
        WireHeader {
            compression: Compression::None,
            schema_version_id,
        }
        .write(&mut out);
        out.extend_from_slice(&datum);
        Ok(out)
    }
}

fn parse_schema(definition: &str) -> Result<Schema> {
    Schema::parse_str(definition).map_err(|e| Error::Glue(format!("invalid avro schema: {e}")))
}
