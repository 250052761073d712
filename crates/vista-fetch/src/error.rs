use thiserror::Error;
use vista_core::{CoreError, ErrorCode};

/// Failure of a single fetch kind, carried into [`vista_core::ExecutionResult`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct FetchError {
    /// Structured error code
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl FetchError {
    /// Create a new fetch error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<CoreError> for FetchError {
    fn from(err: CoreError) -> Self {
        FetchError::new(ErrorCode::TransformFailed, err.to_string())
    }
}

/// Result alias for fetch kinds
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors raised by an [`crate::HttpTransport`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection or protocol failure
    #[error("Request failed: {0}")]
    Request(String),

    /// Non-success status code
    #[error("Unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// The transport gave up waiting
    #[error("Request timed out")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::new(ErrorCode::HttpNoUrl, "no url configured");
        assert_eq!(err.to_string(), "HTTP_NO_URL: no url configured");
    }

    #[test]
    fn test_core_error_becomes_transform_failure() {
        let err: FetchError = CoreError::TransformError("path 'a.b' not found".to_string()).into();
        assert_eq!(err.code, ErrorCode::TransformFailed);
        assert!(err.message.contains("a.b"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "Unexpected status 502: bad gateway");
    }
}
