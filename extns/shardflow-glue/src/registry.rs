//! Lookups and registration against a Glue Schema Registry.
use aws_sdk_glue::Client;
use aws_sdk_glue::types::{
    Compatibility, DataFormat, RegistryId, SchemaId, SchemaVersionNumber,
};
use uuid::Uuid;

use crate::{Error, GlueConfig, Result, extract_aws_error};

/// A concrete version of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersion {
    pub schema_version_id: Uuid,
    pub definition: String,
}

#[derive(Clone)]
pub struct GlueRegistry {
    client: Client,
    registry_name: String,
}

#[derive(Clone)]
pub struct GlueRegistryBuilder {
    config: GlueConfig,
    registry_name: String,
    client: Option<Client>,
}

impl GlueRegistryBuilder {
    pub fn new(config: GlueConfig, registry_name: impl Into<String>) -> Self {
        Self {
            config,
            registry_name: registry_name.into(),
            client: None,
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub async fn build(self) -> Result<GlueRegistry> {
        if self.registry_name.is_empty() {
            return Err(Error::InvalidConfig("registry name is required".to_string()));
        }
        let client = match self.client {
            Some(client) => client,
            None => crate::create_glue_client(&self.config).await?,
        };
        Ok(GlueRegistry {
            client,
            registry_name: self.registry_name,
        })
    }
}

impl GlueRegistry {
    pub fn registry_name(&self) -> &str {
        &self.registry_name
    }

    fn schema_id(&self, schema_name: &str) -> SchemaId {
        SchemaId::builder()
            .registry_name(&self.registry_name)
            .schema_name(schema_name)
            .build()
    }

    /// Resolves the latest version of `schema_name`. A schema missing from the registry yields
    /// [Error::EntityNotFound].
    pub async fn latest(&self, schema_name: &str) -> Result<SchemaVersion> {
        let output = self
            .client
            .get_schema_version()
            .schema_id(self.schema_id(schema_name))
            .schema_version_number(SchemaVersionNumber::builder().latest_version(true).build())
            .send()
            .await
            .map_err(|err| extract_aws_error(&err))?;

        let version = schema_version(output.schema_version_id(), output.schema_definition())?;
        tracing::info!(
            registry = self.registry_name,
            schema_name,
            schema_version_id = %version.schema_version_id,
            "Resolved latest schema version"
        );
        Ok(version)
    }

    /// Fetches a specific schema version by its id.
    pub async fn by_version_id(&self, schema_version_id: Uuid) -> Result<SchemaVersion> {
        let output = self
            .client
            .get_schema_version()
            .schema_version_id(schema_version_id.to_string())
            .send()
            .await
            .map_err(|err| extract_aws_error(&err))?;

        schema_version(output.schema_version_id(), output.schema_definition())
    }

    /// Creates `schema_name` as an Avro schema with FULL compatibility. If it already exists,
    /// registers `definition` as a version instead. Registering a definition identical to an
    /// existing version returns that version's id.
    pub async fn get_or_register(&self, schema_name: &str, definition: &str) -> Result<Uuid> {
        let created = self
            .client
            .create_schema()
            .registry_id(
                RegistryId::builder()
                    .registry_name(&self.registry_name)
                    .build(),
            )
            .schema_name(schema_name)
            .data_format(DataFormat::Avro)
            .compatibility(Compatibility::Full)
            .schema_definition(definition)
            .send()
            .await;

        let version_id = match created {
            Ok(output) => {
                tracing::info!(schema_name, "Created schema");
                output.schema_version_id().map(str::to_string)
            }
            Err(err) => {
                let err = extract_aws_error(&err);
                if err.is_transient() {
                    return Err(err);
                }
                tracing::info!(
                    schema_name,
                    ?err,
                    "Schema could not be created, registering a new version"
                );
                self.client
                    .register_schema_version()
                    .schema_id(self.schema_id(schema_name))
                    .schema_definition(definition)
                    .send()
                    .await
                    .map_err(|err| extract_aws_error(&err))?
                    .schema_version_id()
                    .map(str::to_string)
            }
        };

        let version_id = version_id
            .ok_or_else(|| Error::Glue(format!("no schema version id for {schema_name}")))?;
        parse_version_id(&version_id)
    }
}

fn parse_version_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|e| Error::Glue(format!("invalid schema version id {id}: {e}")))
}

fn schema_version(id: Option<&str>, definition: Option<&str>) -> Result<SchemaVersion> {
    let id = id.ok_or_else(|| Error::Glue("schema version id is missing".to_string()))?;
    let definition =
        definition.ok_or_else(|| Error::Glue("schema definition is missing".to_string()))?;
    Ok(SchemaVersion {
        schema_version_id: parse_version_id(id)?,
        definition: definition.to_string(),
    })
}
