use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No password has been set or verified yet.
    #[error("Store is locked: password not set")]
    NotUnlocked,

    /// The addressed key does not exist.
    #[error("Record not found")]
    NotFound,

    /// A stored value failed to decrypt or decode.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The addressed table holds no entries.
    #[error("Table is empty")]
    EmptyTable,

    /// The addressed (table, sub-table) pair was never created.
    #[error("No such table: {0}")]
    NoSuchTable(String),

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding of a record failed.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl StoreError {
    /// Corruption means data on disk can no longer be trusted; callers
    /// surface it to the user instead of retrying.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corrupt(_))
    }
}

impl From<murmur_shared::error::CryptoError> for StoreError {
    fn from(e: murmur_shared::error::CryptoError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
