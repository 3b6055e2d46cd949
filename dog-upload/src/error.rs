use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors that can occur during upload operations
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload metadata is missing the identity attribute '{attribute}'")]
    MissingIdentity { attribute: String },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Append offset conflict on {key}: expected {expected}, backend has {}", display_actual(.actual))]
    OffsetConflict {
        key: String,
        expected: u64,
        actual: Option<u64>,
    },

    #[error("Failed to delete objects: {}", .failed.join(", "))]
    PartialFailure { failed: Vec<String> },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid request: {message}")]
    Invalid { message: String },

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

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

fn display_actual(actual: &Option<u64>) -> String {
    match actual {
        Some(len) => len.to_string(),
        None => "an unknown length".to_string(),
    }
}

impl UploadError {
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
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a missing identity error
    pub fn missing_identity<S: Into<String>>(attribute: S) -> Self {
        Self::MissingIdentity {
            attribute: attribute.into(),
        }
    }

    /// Create an offset conflict error
    pub fn offset_conflict<S: Into<String>>(key: S, expected: u64, actual: Option<u64>) -> Self {
        Self::OffsetConflict {
            key: key.into(),
            expected,
            actual,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_offset_conflict(&self) -> bool {
        matches!(self, Self::OffsetConflict { .. })
    }
}
