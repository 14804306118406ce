use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Storage error: {0}")]
    Storage(#[from] storage::error::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed score message: {0}")]
    Malformed(String),
}
