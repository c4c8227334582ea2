mod error;
mod limiter;
mod types;

pub use error::{RateLimitError, RateLimitResult};
pub use limiter::{check_rate_limit, GovernorRateLimiter, RateLimiter};
pub use types::{RateLimitDecision, RateLimitPolicy};
