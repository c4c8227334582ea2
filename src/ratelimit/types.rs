use governor::Quota;
use std::num::NonZeroU32;
use std::time::Duration;

/// Outcome of one limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub remaining: u32,
    /// How long until the request would be allowed; zero when allowed
    pub reset_after: Duration,
}

impl RateLimitDecision {
    pub fn allow(remaining: u32) -> Self {
        Self {
            success: true,
            remaining,
            reset_after: Duration::ZERO,
        }
    }

    pub fn deny(reset_after: Duration) -> Self {
        Self {
            success: false,
            remaining: 0,
            reset_after,
        }
    }
}

/// `max_requests` per `window`, for keys under `prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub prefix: String,
    pub max_requests: NonZeroU32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(prefix: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            max_requests: NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN),
            window,
        }
    }

    /// File submissions per guest
    pub fn uploads() -> Self {
        Self::new("@guestcap/upload", 300, Duration::from_secs(3600))
    }

    /// Archive downloads per event
    pub fn downloads() -> Self {
        Self::new("@guestcap/download", 5, Duration::from_secs(3600))
    }

    /// General API calls
    pub fn api() -> Self {
        Self::new("@guestcap/api", 100, Duration::from_secs(60))
    }

    /// GCRA quota: the whole budget may burst, and it refills evenly over the window
    pub fn quota(&self) -> Quota {
        let period = self.window / self.max_requests.get();
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(self.max_requests))
            .allow_burst(self.max_requests)
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}
