use thiserror::Error;

/// Application-wide error types for eadsync.
#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream or downstream HTTP request returned an error response.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The document could not be parsed as XML at all.
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    /// A schema could not be found or loaded.
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Every identifier part of a record is absent.
    #[error("Record {0} has no identifier parts")]
    MissingIdentifier(String),

    /// The PDF job could not be submitted.
    #[error("Job submission failed: {0}")]
    JobSubmission(String),

    /// The PDF job finished in the failed state.
    #[error("Job {0} failed")]
    JobFailed(String),

    /// The PDF job completed without any output files.
    #[error("Job {0} completed without output files")]
    NoOutput(String),

    /// The PDF job did not finish within the allotted time.
    #[error("Job {uri} did not finish within {waited_secs} seconds")]
    JobTimeout { uri: String, waited_secs: u64 },

    /// The batch was cancelled or hit its deadline.
    #[error("Operation cancelled")]
    Cancelled,

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and a later run may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::JobTimeout { .. } => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
                    || msg.starts_with("HTTP 5")
            }
            _ => false,
        }
    }

    /// Returns true for the cancellation signal, which is reported at batch
    /// level rather than as a per-record error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
