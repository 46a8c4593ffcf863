use thiserror::Error;

use crate::github::{ApiError, ErrorClass};

#[derive(Error, Debug)]
pub enum Error {
    #[error("GitHub API error: {0}")]
    Api(#[from] ApiError),

    #[error("Collection aborted at {repository}: {source}")]
    CircuitOpen {
        repository: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Collection run already finished")]
    RunFinished,

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Invalid snapshot id: {0:?}")]
    InvalidSnapshotId(String),

    #[error("Dataset schema mismatch: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The upstream failure behind this error, if it came from the hosting API.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            Error::CircuitOpen { source, .. } => source.api_error(),
            _ => None,
        }
    }

    /// Failure class as seen by the circuit breaker.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::RepoNotFound(_) => ErrorClass::NotFound,
            other => other
                .api_error()
                .map(ApiError::class)
                .unwrap_or(ErrorClass::Other),
        }
    }
}
