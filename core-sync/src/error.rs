use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync store error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid operation ID: {0}")]
    InvalidOperationId(String),

    #[error("Invalid stored operation: {0}")]
    InvalidRecord(String),

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
