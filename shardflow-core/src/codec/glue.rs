use shardflow_glue::codec::GlueAvroCodec;
use shardflow_glue::registry::{GlueRegistry, SchemaVersion};
use uuid::Uuid;

use crate::codec::{DecodedMessage, RecordCodec, SchemaHandle, SchemaRegistry};
use crate::error::Error;

impl From<shardflow_glue::Error> for Error {
    fn from(value: shardflow_glue::Error) -> Self {
        match value {
            shardflow_glue::Error::Decode(_) => Error::Decode(value.to_string()),
            shardflow_glue::Error::Encode(_) => Error::Producer(value.to_string()),
            shardflow_glue::Error::InvalidConfig(e) => Error::Config(e),
            shardflow_glue::Error::Unavailable(_)
            | shardflow_glue::Error::EntityNotFound(_)
            | shardflow_glue::Error::Glue(_)
            | shardflow_glue::Error::Other(_) => Error::SchemaRegistry(value.to_string()),
        }
    }
}

impl From<SchemaVersion> for SchemaHandle {
    fn from(value: SchemaVersion) -> Self {
        SchemaHandle {
            version_id: value.schema_version_id,
            definition: value.definition,
        }
    }
}

impl From<&SchemaHandle> for SchemaVersion {
    fn from(value: &SchemaHandle) -> Self {
        SchemaVersion {
            schema_version_id: value.version_id,
            definition: value.definition.clone(),
        }
    }
}

impl RecordCodec for GlueAvroCodec {
    async fn decode(&self, payload: &[u8], schema: &SchemaHandle) -> crate::Result<DecodedMessage> {
        let value = GlueAvroCodec::decode(self, payload, Some(schema.version_id)).await?;
        Ok(DecodedMessage { value })
    }
}

impl SchemaRegistry for GlueRegistry {
    async fn latest(&self, name: &str) -> crate::Result<SchemaHandle> {
        match GlueRegistry::latest(self, name).await {
            Ok(version) => Ok(version.into()),
            Err(shardflow_glue::Error::EntityNotFound(_)) => Err(Error::SchemaNotFound {
                schema: name.to_string(),
                registry: self.registry_name().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_or_register(&self, name: &str, definition: &str) -> crate::Result<SchemaHandle> {
        let version_id = GlueRegistry::get_or_register(self, name, definition).await?;
        Ok(SchemaHandle {
            version_id,
            definition: definition.to_string(),
        })
    }

    async fn by_version_id(&self, version_id: Uuid) -> crate::Result<SchemaHandle> {
        Ok(GlueRegistry::by_version_id(self, version_id).await?.into())
    }
}
