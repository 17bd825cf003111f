use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Throttling, timeouts, 5xx responses and expired iterators. The cycle is retried.
    #[error("Upstream Unavailable - {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream Error - {0}")]
    Upstream(String),

    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Schema Registry Error - {0}")]
    SchemaRegistry(String),

    #[error("Schema {schema} not found in {registry} registry")]
    SchemaNotFound { schema: String, registry: String },

    #[error("Lease Error - {0}")]
    Lease(String),

    #[error("Producer Error - {0}")]
    Producer(String),

    #[error("IO Error - {0}")]
    Io(String),

    #[error("Worker Error - {0}")]
    Worker(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Error::Worker(value.to_string())
    }
}
