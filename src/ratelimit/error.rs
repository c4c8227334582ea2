use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Rate limiter backend unavailable: {0}")]
    Backend(String),
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;
