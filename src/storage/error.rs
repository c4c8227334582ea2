use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Signed URL expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Storage returned status {0}")]
    Status(u16),

    #[error("Storage request failed: {0}")]
    Http(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
