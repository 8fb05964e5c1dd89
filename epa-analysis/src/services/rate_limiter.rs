//! Per-owner submission rate limiting
//!
//! One limiter instance lives in the application state for the lifetime of the
//! server. Each owner gets its own `submissions_per_minute` allowance; state for
//! owners that stayed quiet long enough is dropped by [`SubmissionLimiter::purge_idle`].

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

pub struct SubmissionLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    per_minute: NonZeroU32,
}

impl SubmissionLimiter {
    pub fn new(submissions_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(submissions_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
            per_minute,
        }
    }

    /// Consume one submission for `owner_id`; `false` when over the allowance
    pub fn check(&self, owner_id: &str) -> bool {
        self.limiter.check_key(&owner_id.to_string()).is_ok()
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute.get()
    }

    /// Forget owners whose allowance fully replenished
    pub fn purge_idle(&self) {
        self.limiter.retain_recent();
    }
}
