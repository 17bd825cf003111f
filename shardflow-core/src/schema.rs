//! Fetches the latest definition of a schema, optionally saving it to a file.
use std::path::Path;

use tracing::info;

use crate::Result;
use crate::codec::SchemaRegistry;
use crate::error::Error;

/// Returns the latest definition of `schema_name`, pretty-printed when it is valid JSON, and
/// writes it to `output` if given.
pub async fn fetch_latest<R: SchemaRegistry>(
    registry: &R,
    schema_name: &str,
    output: Option<&Path>,
) -> Result<String> {
    let schema = registry.latest(schema_name).await?;
    let definition = pretty(&schema.definition);

    if let Some(path) = output {
        tokio::fs::write(path, &definition)
            .await
            .map_err(|e| Error::Io(format!("writing schema to {}: {e}", path.display())))?;
        info!(
            schema_name,
            version_id = %schema.version_id,
            path = %path.display(),
            "Schema written"
        );
    }

    Ok(definition)
}

fn pretty(definition: &str) -> String {
    serde_json::from_str::<serde_json::Value>(definition)
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| definition.to_string())
}
