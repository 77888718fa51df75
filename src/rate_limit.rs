/// Rate Limiting System
///
/// One keyed governor limiter per bucket. Keys are the normalized identifier
/// the attempt is about (login name, email, account id), so one noisy client
/// cannot exhaust another identifier's allowance.
use crate::{
    config::{RateLimitConfig, RateLimitRule},
    error::{IdentityError, IdentityResult},
    metrics,
};
use governor::{
    clock::{Clock as _, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type KeyedLimiter = GovernorLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate-limited operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBucket {
    Login,
    PasswordReset,
    ResetSubmit,
    Verification,
    ChangePassword,
}

impl RateLimitBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitBucket::Login => "login",
            RateLimitBucket::PasswordReset => "password_reset",
            RateLimitBucket::ResetSubmit => "reset_submit",
            RateLimitBucket::Verification => "verification",
            RateLimitBucket::ChangePassword => "change_password",
        }
    }
}

/// `max_attempts` per `window_secs`, allowed as one burst
fn quota(rule: RateLimitRule) -> Quota {
    let burst = NonZeroU32::new(rule.max_attempts).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs(rule.window_secs.max(1)) / burst.get();

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    login: Arc<KeyedLimiter>,
    password_reset: Arc<KeyedLimiter>,
    reset_submit: Arc<KeyedLimiter>,
    verification: Arc<KeyedLimiter>,
    change_password: Arc<KeyedLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            login: Arc::new(GovernorLimiter::keyed(quota(config.login))),
            password_reset: Arc::new(GovernorLimiter::keyed(quota(config.password_reset))),
            reset_submit: Arc::new(GovernorLimiter::keyed(quota(config.reset_submit))),
            verification: Arc::new(GovernorLimiter::keyed(quota(config.verification))),
            change_password: Arc::new(GovernorLimiter::keyed(quota(config.change_password))),
        }
    }

    fn limiter(&self, bucket: RateLimitBucket) -> &KeyedLimiter {
        match bucket {
            RateLimitBucket::Login => &self.login,
            RateLimitBucket::PasswordReset => &self.password_reset,
            RateLimitBucket::ResetSubmit => &self.reset_submit,
            RateLimitBucket::Verification => &self.verification,
            RateLimitBucket::ChangePassword => &self.change_password,
        }
    }

    /// Count one attempt against `identifier` in `bucket`
    pub fn check(&self, bucket: RateLimitBucket, identifier: &str) -> IdentityResult<()> {
        if !self.enabled {
            return Ok(());
        }

        let key = identifier.trim().to_lowercase();
        match self.limiter(bucket).check_key(&key) {
            Ok(_) => Ok(()),
            Err(not_until) => {
                let retry_after = not_until.wait_time_from(DefaultClock::default().now());
                metrics::record_rate_limited(bucket.as_str());
                tracing::warn!(
                    bucket = bucket.as_str(),
                    retry_after_secs = retry_after.as_secs(),
                    "Rate limit exceeded"
                );
                Err(IdentityError::RateLimited { retry_after })
            }
        }
    }

    /// Drop state for keys whose allowance has fully replenished
    pub fn retain_recent(&self) {
        for limiter in [
            &self.login,
            &self.password_reset,
            &self.reset_submit,
            &self.verification,
            &self.change_password,
        ] {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }

    /// Number of keys currently tracked across all buckets
    pub fn tracked_keys(&self) -> usize {
        self.login.len()
            + self.password_reset.len()
            + self.reset_submit.len()
            + self.verification.len()
            + self.change_password.len()
    }
}
