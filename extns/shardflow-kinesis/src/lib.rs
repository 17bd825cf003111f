//! Thin client for Amazon Kinesis Data Streams.
//!
//! [source] lists shards, positions shard iterators and fetches record batches. [sink] writes
//! records with `PutRecords`. AWS SDK failures are flattened into [Error] and classified as
//! transient ([Error::Unavailable], [Error::ExpiredIterator]) or fatal.
use aws_config::{BehaviorVersion, Region, meta::region::RegionProviderChain};
use aws_sdk_kinesis::Client;
use aws_sdk_kinesis::error::{ProvideErrorMetadata, SdkError};

pub mod sink;
pub mod source;

pub const KINESIS_DEFAULT_REGION: &str = "us-west-2";

/// Error codes returned by Kinesis that are worth retrying on a later cycle.
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ProvisionedThroughputExceededException",
    "LimitExceededException",
    "KMSThrottlingException",
    "InternalFailure",
    "ServiceUnavailable",
    "ThrottlingException",
];

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Kinesis unavailable - {0}")]
    Unavailable(String),

    #[error("Shard iterator expired - {0}")]
    ExpiredIterator(String),

    #[error("Failed with Kinesis error - {0}")]
    Kinesis(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure is expected to clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::ExpiredIterator(_))
    }
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

/// Connection settings shared by the source and the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct KinesisConfig {
    pub region: String,
    /// Overrides the service endpoint, e.g. for a local emulator.
    pub endpoint_url: Option<String>,
}

pub fn aws_behavior_version() -> BehaviorVersion {
    BehaviorVersion::latest()
}

/// Creates a Kinesis client for the configured region.
pub async fn create_kinesis_client(config: &KinesisConfig) -> Result<Client> {
    if config.region.is_empty() {
        return Err(Error::InvalidConfig("region is required".to_string()));
    }

    tracing::info!(region = config.region, "Creating Kinesis client in region");

    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()))
        .or_default_provider()
        .or_else(Region::new(KINESIS_DEFAULT_REGION));

    let mut loader = aws_config::defaults(aws_behavior_version()).region(region_provider);
    if let Some(endpoint_url) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    Ok(Client::new(&loader.load().await))
}

/// Flattens an SDK error into a `code: message` description and classifies it.
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
            let message = err.message().unwrap_or("no error message");
            let description = format!("{code}: {message}");
            if code == "ExpiredIteratorException" {
                Error::ExpiredIterator(description)
            } else if TRANSIENT_ERROR_CODES.contains(&code) {
                Error::Unavailable(description)
            } else {
                Error::Kinesis(description)
            }
        }
    }
}
