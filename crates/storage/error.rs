use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to acquire store lock")]
    LockError,
    #[error("Database is corrupted: {0}")]
    Corrupted(String),
    #[error("{0}")]
    Custom(String),
}
