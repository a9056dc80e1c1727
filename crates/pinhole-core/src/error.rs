use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

/// Errors reported by a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The short code is already assigned to another record.
    #[error("short code already taken: {0}")]
    CodeTaken(String),
    /// The owner already has an active record for this URL.
    /// Carries the short URL of the existing record.
    #[error("url already shortened as {0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
}

/// Outcomes of the shortener facade that are not a plain success.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShortenerError {
    /// The URL is already shortened by this user. Carries the existing short URL.
    #[error("url already shortened as {0}")]
    ConflictInsert(String),
    #[error("short code not found: {0}")]
    NotFound(String),
    #[error("short code was deleted: {0}")]
    Gone(String),
    #[error("storage connection failed: {0}")]
    ConnectionFailure(String),
    #[error("snapshot serialization failed: {0}")]
    SerializationFailure(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no free short code after {0} attempts")]
    CodeSpaceExhausted(usize),
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidInput(message),
        }
    }
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict(short_url) => Self::ConflictInsert(short_url),
            StorageError::Unavailable(message) | StorageError::Timeout(message) => {
                Self::ConnectionFailure(message)
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflict_becomes_conflict_insert() {
        let err: ShortenerError = StorageError::Conflict("http://short.ly/abc".into()).into();
        assert_eq!(err, ShortenerError::ConflictInsert("http://short.ly/abc".into()));
    }

    #[test]
    fn timeouts_are_connection_failures() {
        let err: ShortenerError = StorageError::Timeout("ping".into()).into();
        assert!(matches!(err, ShortenerError::ConnectionFailure(_)));

        let err: ShortenerError = StorageError::Unavailable("closed".into()).into();
        assert!(matches!(err, ShortenerError::ConnectionFailure(_)));
    }

    #[test]
    fn query_failures_stay_storage_errors() {
        let err: ShortenerError = StorageError::Query("syntax".into()).into();
        assert_eq!(err, ShortenerError::Storage("storage query failed: syntax".into()));
    }
}
