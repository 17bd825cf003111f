//! AWS Glue Schema Registry client and the Glue wire-format Avro codec.
use aws_config::{BehaviorVersion, Region, meta::region::RegionProviderChain};
use aws_sdk_glue::Client;
use aws_sdk_glue::error::{ProvideErrorMetadata, SdkError};

pub mod codec;
pub mod registry;

pub const GLUE_DEFAULT_REGION: &str = "us-west-2";

const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ThrottlingException",
    "InternalServiceException",
    "OperationTimeoutException",
    "ConcurrentModificationException",
];

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Glue unavailable - {0}")]
    Unavailable(String),

    #[error("Entity not found - {0}")]
    EntityNotFound(String),

    #[error("Failed with Glue error - {0}")]
    Glue(String),

    #[error("Failed to decode record - {0}")]
    Decode(String),

    #[error("Failed to encode record - {0}")]
    Encode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlueConfig {
    pub region: String,
    pub endpoint_url: Option<String>,
}

pub fn aws_behavior_version() -> BehaviorVersion {
    BehaviorVersion::latest()
}

pub async fn create_glue_client(config: &GlueConfig) -> Result<Client> {
    if config.region.is_empty() {
        return Err(Error::InvalidConfig("region is required".to_string()));
    }

    tracing::info!(region = config.region, "Creating Glue client in region");

    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()))
        .or_default_provider()
        .or_else(Region::new(GLUE_DEFAULT_REGION));

    let mut loader = aws_config::defaults(aws_behavior_version()).region(region_provider);
    if let Some(endpoint_url) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    Ok(Client::new(&loader.load().await))
}

pub(crate) fn extract_aws_error<E, R>(err: &SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) => Error::Unavailable("request timed out".to_string()),
        SdkError::DispatchFailure(_) => {
            Error::Unavailable("failed to dispatch request".to_string())
        }
        SdkError::ResponseError(_) => {
            Error::Unavailable("malformed or truncated response".to_string())
        }
        _ => {
            let code = err.code().unwrap_or("Unknown");
            let description = format!(
                "{code}: {}",
                err.message().unwrap_or("no error message")
            );
            match code {
                "EntityNotFoundException" => Error::EntityNotFound(description),
                code if TRANSIENT_ERROR_CODES.contains(&code) => Error::Unavailable(description),
                _ => Error::Glue(description),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_creation_requires_region() {
        let config = GlueConfig {
            region: String::new(),
            endpoint_url: None,
        };
        assert!(matches!(
            create_glue_client(&config).await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_client_creation() {
        let config = GlueConfig {
            region: "eu-west-1".to_string(),
            endpoint_url: None,
        };
        assert!(create_glue_client(&config).await.is_ok());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Unavailable("throttled".into()).is_transient());
        assert!(!Error::EntityNotFound("gone".into()).is_transient());
        assert!(!Error::Decode("bad header".into()).is_transient());
    }
}
