use thiserror::Error;

/// Errors surfaced by the payment lifecycle engine.
///
/// `InvalidInput` and `NotFound` are client-facing rejections. The rest are
/// operational failures that the service either retries internally or turns
/// into a failed request.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("payment not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invariant violated: {0}")]
    Conflict(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether a retry of the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::StorageFailure(_))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<csv::Error> for GatewayError {
    fn from(e: csv::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(e.to_string())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for GatewayError {
    fn from(e: rocksdb::Error) -> Self {
        Self::StorageFailure(e.to_string())
    }
}
