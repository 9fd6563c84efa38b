use thiserror::Error;

/// Boundary error type for the repository and blob store (spec §7).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage has not been opened yet")]
    NotStarted,

    #[error("database busy, retry")]
    Busy,

    #[error("repository corrupted and could not be recovered: {0}")]
    Corrupted(String),

    #[error("invalid storage reference: {0}")]
    InvalidStorageRef(String),

    #[error("no row found for id {0}")]
    NotFound(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
