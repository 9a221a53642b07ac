use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("CAS mismatch: {0}")]
    CasMismatch(String),

    #[error("Value too large: {0}")]
    ValueTooLarge(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Sub-document failures
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Path already exists: {0}")]
    PathExists(String),

    #[error("Path mismatch: {0}")]
    PathMismatch(String),

    #[error("Failed to decode content for key {key}: {message}")]
    Decode { key: String, message: String },

    // Connectivity
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Cluster session closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::CasMismatch(_) => "CAS_MISMATCH",
            Error::ValueTooLarge(_) => "VALUE_TOO_LARGE",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::PathNotFound(_) => "PATH_NOT_FOUND",
            Error::PathExists(_) => "PATH_EXISTS",
            Error::PathMismatch(_) => "PATH_MISMATCH",
            Error::Decode { .. } => "DECODE_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::Unavailable(_) => "UNAVAILABLE",
            Error::Connection(_) => "CONNECTION_ERROR",
            Error::BucketNotFound(_) => "BUCKET_NOT_FOUND",
            Error::Closed => "CLOSED",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error is a connectivity or otherwise transient failure.
    ///
    /// Nothing in the client retries per-operation errors on its own; callers
    /// use this to decide whether resubmitting is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Unavailable(_) => true,
            Error::Connection(_) => true,
            Error::BucketNotFound(_) => true,

            Error::NotFound(_) => false,
            Error::AlreadyExists(_) => false,
            Error::CasMismatch(_) => false,
            Error::ValueTooLarge(_) => false,
            Error::InvalidArgument(_) => false,
            Error::PathNotFound(_) => false,
            Error::PathExists(_) => false,
            Error::PathMismatch(_) => false,
            Error::Decode { .. } => false,
            Error::Closed => false,
            Error::Internal(_) => false,
        }
    }

    /// Builds a content-decoding error for `key`.
    pub fn decode(key: impl Into<String>, err: impl std::fmt::Display) -> Error {
        Error::Decode {
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Adds context to an error by wrapping it in an Internal error.
    ///
    /// # Examples
    ///
    /// ```
    /// use kvgate_core::Error;
    ///
    /// let err = Error::Closed.with_context("flush batch");
    /// assert_eq!(err.to_string(), "Internal error: flush batch: Cluster session closed");
    /// ```
    pub fn with_context(self, context: &str) -> Error {
        Error::Internal(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_are_retryable() {
        assert!(Error::Timeout("probe".into()).is_retryable());
        assert!(Error::Unavailable("node down".into()).is_retryable());
        assert!(Error::Connection("refused".into()).is_retryable());
        assert!(Error::BucketNotFound("default".into()).is_retryable());
    }

    #[test]
    fn test_logical_errors_are_not_retryable() {
        assert!(!Error::CasMismatch("user::1".into()).is_retryable());
        assert!(!Error::NotFound("user::1".into()).is_retryable());
        assert!(!Error::decode("user::1", "expected object").is_retryable());
        assert!(!Error::Closed.is_retryable());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::NotFound("k".into()).code(), "NOT_FOUND");
        assert_eq!(Error::decode("k", "bad").code(), "DECODE_ERROR");
        assert_eq!(Error::Closed.code(), "CLOSED");
    }

    #[test]
    fn test_decode_error_carries_key() {
        let err = Error::decode("user::7", "trailing characters");
        assert_eq!(
            err.to_string(),
            "Failed to decode content for key user::7: trailing characters"
        );
    }
}
