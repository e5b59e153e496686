use thiserror::Error;

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors that can occur during transfer operations
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Integrity mismatch: expected digest {expected}, backend reported {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Part sequence violation: {message}")]
    PartSequence { message: String },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Create an integrity mismatch error
    pub fn integrity<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::IntegrityMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a part sequence violation error
    pub fn part_sequence<S: Into<String>>(message: S) -> Self {
        Self::PartSequence {
            message: message.into(),
        }
    }

    /// Whether this error reports a missing source object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error reports a digest comparison failure
    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, Self::IntegrityMismatch { .. })
    }
}
