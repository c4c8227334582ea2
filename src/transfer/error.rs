use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransferError {
    #[error("Upload aborted")]
    Aborted,

    #[error("Upload failed with status {0}")]
    Status(u16),

    #[error("Network error during upload: {0}")]
    Network(String),

    #[error("Upload failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransferError>,
    },
}

impl TransferError {
    /// Transient failures worth another attempt. Client errors (expired or
    /// invalid destinations included) and aborts are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Network(_) => true,
            TransferError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            TransferError::Aborted | TransferError::RetriesExhausted { .. } => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TransferError::Aborted)
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransferError::Status(status.as_u16()),
            None => TransferError::Network(err.to_string()),
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
