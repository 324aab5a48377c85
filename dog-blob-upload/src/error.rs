use thiserror::Error;

/// Result type for upload operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur while chunking and uploading a blob
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob not found: {id}")]
    NotFound { id: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    /// The source must support seeking for this operation
    #[error("Stream must be seekable: {name}")]
    NotSeekable { name: String },

    /// A conditional header (if-match, append position, max size, lease) was rejected
    #[error("Condition not met: {condition}")]
    ConditionNotMet { condition: String },

    /// Content validation failed for an uploaded chunk
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

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

impl BlobError {
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
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a not seekable error for the named argument
    pub fn not_seekable<S: Into<String>>(name: S) -> Self {
        Self::NotSeekable { name: name.into() }
    }

    /// Create a condition not met error
    pub fn condition_not_met<S: Into<String>>(condition: S) -> Self {
        Self::ConditionNotMet {
            condition: condition.into(),
        }
    }

    /// Create a checksum mismatch error
    pub fn checksum_mismatch<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::ChecksumMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an upload failed error
    pub fn upload_failed<S: Into<String>>(reason: S) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    /// True for content validation failures
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}

impl From<tokio::task::JoinError> for BlobError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::upload_failed("upload task was cancelled")
        } else {
            Self::upload_failed(format!("upload task panicked: {}", err))
        }
    }
}
