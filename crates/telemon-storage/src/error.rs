use telemon_common::MetricError;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_storage::error::{ErrorClass, StorageError};
///
/// let err = StorageError::NoFileConfigured;
/// assert!(err.to_string().contains("no metrics file"));
/// assert_eq!(err.class(), ErrorClass::Internal);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The metric failed validation; nothing was stored.
    #[error("Storage: {0}")]
    InvalidMetric(#[from] MetricError),

    /// A snapshot operation was requested on a store without a file, or after close.
    #[error("Storage: no metrics file configured")]
    NoFileConfigured,

    /// Snapshots hold totals, so they can only be replayed into an empty store.
    #[error("Storage: refusing to load snapshot into a non-empty store")]
    NotEmpty,

    /// The store was closed; no further operations are possible.
    #[error("Storage: store is closed")]
    Closed,

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be mapped back to a metric.
    #[error("Storage: corrupt row for '{name}': {reason}")]
    CorruptRow { name: String, reason: String },
}

/// Coarse classification used by the HTTP and gRPC boundaries to pick a
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected input; retrying the same request will fail again.
    BadInput,
    /// Backend temporarily unreachable; retry later.
    Unavailable,
    /// Anything else.
    Internal,
}

impl StorageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StorageError::InvalidMetric(_) => ErrorClass::BadInput,
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::CannotOpen
                ) =>
            {
                ErrorClass::Unavailable
            }
            StorageError::Io(_) | StorageError::Closed => ErrorClass::Unavailable,
            _ => ErrorClass::Internal,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
