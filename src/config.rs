use crate::completeness::ProfileTier;
use crate::recovery::RecoveryStrategyKind;
use std::time::Duration;

/// Bounded exponential backoff shared by direct retries (`update_with_retry`).
///
/// Attempt `n` (zero-based) waits `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the failed attempt `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let cap = (self.max_delay.as_millis().min(u64::MAX as u128) as u64).max(base);
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(base.saturating_mul(factor).min(cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Limits enforced before a change leaves the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_bio_chars: usize,
    pub max_skills: usize,
    pub max_avatar_bytes: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_bio_chars: 500,
            max_skills: 50,
            max_avatar_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Session-wide configuration of the synchronization core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time-to-live of profile cache entries
    pub profile_ttl: Duration,

    /// Time-to-live of avatar cache entries (`None`: kept until invalidated)
    pub avatar_ttl: Option<Duration>,

    /// Maximum number of entries per cache table
    pub cache_capacity: usize,

    /// Backoff policy for `update_with_retry`
    pub retry: RetryPolicy,

    /// Replays an offline item may fail before it is dropped
    pub queue_max_retries: u32,

    /// Maximum number of deferred mutations
    pub queue_capacity: usize,

    /// Recovery strategies, tried in order
    pub recovery_strategies: Vec<RecoveryStrategyKind>,

    /// Subscription tier used for completeness weights
    pub tier: ProfileTier,

    pub validation: ValidationLimits,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            profile_ttl: Duration::from_secs(5 * 60),
            avatar_ttl: None,
            cache_capacity: 512,
            retry: RetryPolicy::default(),
            queue_max_retries: 3,
            queue_capacity: 100,
            recovery_strategies: RecoveryStrategyKind::DEFAULT_ORDER.to_vec(),
            tier: ProfileTier::Basic,
            validation: ValidationLimits::default(),
        }
    }

    /// Set the profile cache TTL
    pub fn profile_ttl(mut self, ttl: Duration) -> Self {
        self.profile_ttl = ttl;
        self
    }

    /// Set the avatar cache TTL
    pub fn avatar_ttl(mut self, ttl: Duration) -> Self {
        self.avatar_ttl = Some(ttl);
        self
    }

    /// Set the per-table cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the direct retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how many failed replays an offline item survives
    pub fn queue_max_retries(mut self, max_retries: u32) -> Self {
        self.queue_max_retries = max_retries;
        self
    }

    /// Set the offline queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Replace the recovery strategy order
    pub fn recovery_strategies(mut self, strategies: Vec<RecoveryStrategyKind>) -> Self {
        self.recovery_strategies = strategies;
        self
    }

    /// Set the completeness tier
    pub fn tier(mut self, tier: ProfileTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn validation(mut self, limits: ValidationLimits) -> Self {
        self.validation = limits;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.profile_ttl.is_zero() {
            return Err("profile_ttl must be > 0".to_string());
        }

        if self.avatar_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err("avatar_ttl must be > 0 when set".to_string());
        }

        if self.cache_capacity == 0 {
            return Err("cache_capacity must be > 0".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".to_string());
        }

        if self.retry.max_delay < self.retry.base_delay {
            return Err("retry.max_delay cannot be below retry.base_delay".to_string());
        }

        if self.queue_max_retries == 0 {
            return Err("queue_max_retries must be > 0".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("queue_capacity must be > 0".to_string());
        }

        let mut seen = Vec::with_capacity(self.recovery_strategies.len());
        for strategy in &self.recovery_strategies {
            if seen.contains(strategy) {
                return Err(format!("recovery strategy {strategy} listed twice"));
            }
            seen.push(*strategy);
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.profile_ttl, Duration::from_secs(300));
        assert_eq!(config.avatar_ttl, None);
        assert_eq!(config.recovery_strategies.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = SyncConfig::new()
            .profile_ttl(Duration::from_secs(30))
            .queue_max_retries(2)
            .tier(ProfileTier::Enterprise)
            .retry(RetryPolicy::new(5, Duration::from_millis(10)));

        assert_eq!(config.profile_ttl, Duration::from_secs(30));
        assert_eq!(config.queue_max_retries, 2);
        assert_eq!(config.tier, ProfileTier::Enterprise);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_validate() {
        assert!(SyncConfig::new().cache_capacity(0).validate().is_err());
        assert!(SyncConfig::new().queue_max_retries(0).validate().is_err());
        assert!(SyncConfig::new().profile_ttl(Duration::ZERO).validate().is_err());

        let duplicated = SyncConfig::new().recovery_strategies(vec![
            RecoveryStrategyKind::CacheFallback,
            RecoveryStrategyKind::CacheFallback,
        ]);
        assert!(duplicated.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy =
            RetryPolicy::new(6, Duration::from_millis(100)).max_delay(Duration::from_millis(500));

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(60), Duration::from_millis(500));
    }
}
