//! Reconnection backoff with exponential delay and jitter

use std::time::Duration;

/// Configuration for automatic reconnection with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt)
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0); 0.5 spreads delays over ±50%
    pub jitter: f64,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.5,
            max_attempts: None, // Retry forever
        }
    }
}

impl BackoffPolicy {
    /// Create a new policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set jitter factor
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Disable reconnection
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    /// Nominal delay for a given attempt number (1-indexed), before jitter.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    /// Apply jitter to a base delay, clamped to `max_delay`
    pub fn apply_jitter(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 {
            return base;
        }

        let jitter_range = base.as_millis() as f64 * self.jitter;
        let jitter = rand::random::<f64>() * 2.0 * jitter_range - jitter_range;
        let adjusted_ms = (base.as_millis() as f64 + jitter).max(0.0) as u64;

        Duration::from_millis(adjusted_ms).min(self.max_delay)
    }

    /// Check if another reconnection attempt is allowed
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Backoff state for one client: the attempt counter and the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    next_delay: Duration,
}

impl Backoff {
    /// Create backoff state at attempt zero
    pub fn new(policy: BackoffPolicy) -> Self {
        let next_delay = policy.delay_for_attempt(1);
        Self {
            policy,
            attempt: 0,
            next_delay,
        }
    }

    /// Failed connect/auth attempts since the last time the client was Live
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Nominal delay the next failure will wait, before jitter
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// The policy in use
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a failure.
    ///
    /// Returns the jittered delay to wait, or `None` once the attempt budget
    /// is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        if !self.policy.should_reconnect(self.attempt) {
            return None;
        }

        let base = self.next_delay;
        self.attempt = self.attempt.saturating_add(1);
        self.next_delay = self.policy.delay_for_attempt(self.attempt + 1);

        Some(self.policy.apply_jitter(base))
    }

    /// Reset after reaching Live
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.policy.delay_for_attempt(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy::new().with_jitter(0.0)
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.jitter, 0.5);
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn test_delay_calculation() {
        let policy = no_jitter();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(32));

        // Should cap at max_delay
        assert_eq!(policy.delay_for_attempt(7), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_delays_non_decreasing_until_cap() {
        let mut backoff = Backoff::new(no_jitter());
        let mut previous = Duration::ZERO;

        for _ in 0..20 {
            let delay = backoff.on_failure().unwrap();
            assert!(delay >= previous, "{delay:?} < {previous:?}");
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(60));
        assert_eq!(backoff.attempt(), 20);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.on_failure();
        backoff.on_failure();
        backoff.on_failure();
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.on_failure(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::new();
        let base = Duration::from_secs(10);

        for _ in 0..200 {
            let delay = policy.apply_jitter(base);
            assert!(delay >= Duration::from_secs(5), "{delay:?}");
            assert!(delay <= Duration::from_secs(15), "{delay:?}");
        }

        // Jitter never pushes past the cap
        for _ in 0..200 {
            assert!(policy.apply_jitter(Duration::from_secs(60)) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn test_should_reconnect() {
        let unlimited = BackoffPolicy::default();
        assert!(unlimited.should_reconnect(0));
        assert!(unlimited.should_reconnect(100));

        let limited = BackoffPolicy::default().with_max_attempts(3);
        assert!(limited.should_reconnect(0));
        assert!(limited.should_reconnect(2));
        assert!(!limited.should_reconnect(3));

        let disabled = BackoffPolicy::disabled();
        assert!(!disabled.should_reconnect(0));
    }

    #[test]
    fn test_attempt_budget_exhausted() {
        let mut backoff = Backoff::new(no_jitter().with_max_attempts(2));
        assert!(backoff.on_failure().is_some());
        assert!(backoff.on_failure().is_some());
        assert!(backoff.on_failure().is_none());
    }
}
