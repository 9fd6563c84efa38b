use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service has not been started")]
    NotStarted,

    #[error("search timed out")]
    SearchTimeout,

    #[error(transparent)]
    Storage(#[from] scopy_storage::StorageError),

    #[error(transparent)]
    Search(#[from] scopy_search::SearchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
