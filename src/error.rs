use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("failed to read {var} from {path}: {source}")]
    SecretFile {
        var: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not a valid request document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("queue returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("queue response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The object's generation no longer matches the one the write was conditioned on.
    #[error("generation mismatch (412) writing {key}")]
    Conflict { key: String },
    #[error("object not found: {key}")]
    NotFound { key: String },
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status} for {key}: {body}")]
    Status {
        key: String,
        status: StatusCode,
        body: String,
    },
    #[error("store response could not be decoded: {0}")]
    Decode(String),
    #[error("invalid storage endpoint: {0}")]
    Endpoint(String),
}

impl StoreError {
    /// Only a lost compare-and-swap race is worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Startup failures of either binary, before any message or document is touched.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ProvisionerResult<T> = Result<T, ProvisionerError>;
