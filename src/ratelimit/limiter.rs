//! Keyed rate limiting using the governor crate

use crate::metrics::record_rate_limited;
use crate::ratelimit::error::RateLimitResult;
use crate::ratelimit::types::{RateLimitDecision, RateLimitPolicy};
use async_trait::async_trait;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
    RateLimiter as GcraLimiter,
};
use std::num::NonZeroU32;

/// Allow/deny capability with a reset time
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Spend `cost` units of `key`'s budget
    async fn limit(&self, key: &str, cost: u32) -> RateLimitResult<RateLimitDecision>;
}

type KeyedLimiter = GcraLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// In-process GCRA limiter, one bucket per key
pub struct GovernorRateLimiter {
    policy: RateLimitPolicy,
    limiter: KeyedLimiter,
    clock: DefaultClock,
}

impl GovernorRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        let limiter = GcraLimiter::keyed(policy.quota()).with_middleware::<StateInformationMiddleware>();

        Self {
            policy,
            limiter,
            clock: DefaultClock::default(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Forget keys whose budget has fully refilled
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

#[async_trait]
impl RateLimiter for GovernorRateLimiter {
    async fn limit(&self, key: &str, cost: u32) -> RateLimitResult<RateLimitDecision> {
        let key = self.policy.key(key);
        let cost = NonZeroU32::new(cost).unwrap_or(NonZeroU32::MIN);

        let decision = match self.limiter.check_key_n(&key, cost) {
            Ok(Ok(snapshot)) => RateLimitDecision::allow(snapshot.remaining_burst_capacity()),
            Ok(Err(not_until)) => {
                RateLimitDecision::deny(not_until.wait_time_from(self.clock.now()))
            }
            // More than the whole budget at once never fits
            Err(_) => RateLimitDecision::deny(self.policy.window),
        };

        if !decision.success {
            record_rate_limited(&self.policy.prefix);
        }
        Ok(decision)
    }
}

/// Consult `limiter`, allowing the request if the limiter itself fails
pub async fn check_rate_limit(limiter: &dyn RateLimiter, key: &str, cost: u32) -> RateLimitDecision {
    match limiter.limit(key, cost).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!("Rate limit check for {} failed open: {}", key, e);
            RateLimitDecision::allow(0)
        }
    }
}
