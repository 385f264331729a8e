//! Error types for RateCache operations.

use thiserror::Error;

/// Boxed error used to carry an underlying cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by an upstream rate fetcher.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with a non-success status.
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Failed to decode upstream response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Check if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) => true,
            FetchError::Upstream { status, .. } => *status >= 500 || *status == 429,
            FetchError::Decode(_) => false,
        }
    }
}

/// Read or write against the rate store or the audit log failed.
#[derive(Error, Debug)]
#[error("Storage failure during {operation}")]
pub struct StorageError {
    /// Store operation that failed.
    pub operation: &'static str,
    /// Underlying driver error.
    #[source]
    pub source: BoxError,
}

impl StorageError {
    /// Wrap a driver error raised by `operation`.
    pub fn new(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }
}

/// Failures surfaced by the caching core to its callers.
#[derive(Error, Debug)]
pub enum RateCacheError {
    /// The rate fetcher returned no usable data.
    #[error("Unable to fetch latest currency rates from provider")]
    UpstreamUnavailable,

    /// A store or audit log operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Unexpected failure inside the cache orchestration.
    #[error("Internal failure: {context}")]
    Internal {
        context: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl RateCacheError {
    /// Wrap an unexpected error with context.
    pub fn internal(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        RateCacheError::Internal {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Internal failure without an underlying cause.
    pub fn internal_msg(context: impl Into<String>) -> Self {
        RateCacheError::Internal {
            context: context.into(),
            source: None,
        }
    }

    /// Check if the failure is attributed to the upstream provider.
    pub fn is_upstream(&self) -> bool {
        matches!(self, RateCacheError::UpstreamUnavailable)
    }

    /// Get error code for API responses and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            RateCacheError::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            RateCacheError::Storage(_) => "STORAGE_FAILURE",
            RateCacheError::Internal { .. } => "INTERNAL_FAILURE",
        }
    }

    /// Render the error and its full cause chain on one line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

/// Result type alias for RateCache operations.
pub type Result<T> = std::result::Result<T, RateCacheError>;
