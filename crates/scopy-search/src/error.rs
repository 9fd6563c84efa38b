use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search has not been opened yet")]
    NotStarted,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("search timed out")]
    Timeout,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SearchResult<T> = Result<T, SearchError>;
