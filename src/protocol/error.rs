use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Storage limit exceeded: {used:.1} MB used of {limit:.1} MB, {requested:.1} MB requested")]
    QuotaExceeded { used: f64, limit: f64, requested: f64 },

    #[error("Rate limit exceeded, retry after {0:?}")]
    RateLimited(Duration),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProtocolError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, ProtocolError::QuotaExceeded { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProtocolError::RateLimited(wait) => Some(*wait),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProtocolError::QuotaExceeded { .. } => Some(400),
            ProtocolError::RateLimited(_) => Some(429),
            ProtocolError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(err: reqwest::Error) -> Self {
        ProtocolError::Http(err.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
