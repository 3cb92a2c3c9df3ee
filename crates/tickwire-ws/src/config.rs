//! Client configuration

use crate::reconnect::BackoffPolicy;
use crate::sink::{OverflowPolicy, SinkOptions};
use std::time::Duration;
use thiserror::Error;
use tickwire_types::FeedError;

/// Default provider endpoint
pub const DEFAULT_URL: &str = "wss://ws.finnhub.io";

/// Invalid configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// URL is not a websocket URL
    #[error("Invalid websocket URL: {0:?}")]
    InvalidUrl(String),

    /// A timeout was set to zero
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// Backoff multiplier below 1 would shrink delays
    #[error("Backoff multiplier must be >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    /// Jitter factor outside [0, 1]
    #[error("Jitter must be within [0, 1], got {0}")]
    InvalidJitter(f64),

    /// Initial delay above the cap
    #[error("Initial backoff delay {initial:?} exceeds max delay {max:?}")]
    DelayBounds { initial: Duration, max: Duration },

    /// Sink capacity of zero
    #[error("Sink capacity must be at least 1")]
    ZeroCapacity,

    /// No token in the environment
    #[error("No API token found, set one of: {}", .vars.join(", "))]
    MissingToken { vars: Vec<&'static str> },

    /// Token is empty or whitespace
    #[error("API token is empty")]
    EmptyToken,
}

impl From<ConfigError> for FeedError {
    fn from(err: ConfigError) -> Self {
        FeedError::Configuration(err.to_string())
    }
}

/// Configuration for a [`FeedClient`](crate::FeedClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket endpoint
    pub url: String,
    /// Bound on each transport connect
    pub connect_timeout: Duration,
    /// Time allowed for the provider to accept the token
    pub auth_timeout: Duration,
    /// Silence after which a connection is considered dead
    pub stale_timeout: Duration,
    /// Time `stop()` waits for the transport to close
    pub shutdown_grace: Duration,
    /// Reconnection settings
    pub backoff: BackoffPolicy,
    /// Queue capacity used by `register_sink`
    pub sink_capacity: usize,
    /// Overflow policy used by `register_sink`
    pub overflow_policy: OverflowPolicy,
    /// Bound on each outbound frame write
    pub send_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            stale_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            sink_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set authentication timeout
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set staleness threshold
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Set the write timeout for outbound frames
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set reconnection policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cap the reconnect delay
    pub fn with_reconnect_max_delay(mut self, max: Duration) -> Self {
        self.backoff = self.backoff.with_max_delay(max);
        self
    }

    /// Disable automatic reconnection
    pub fn without_reconnect(mut self) -> Self {
        self.backoff = BackoffPolicy::disabled();
        self
    }

    /// Set default sink capacity
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }

    /// Set default overflow policy
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Make sinks wait for room instead of dropping, up to `timeout`
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.overflow_policy = OverflowPolicy::BlockWithTimeout(timeout);
        self
    }

    /// Options `register_sink` uses
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions::new(self.sink_capacity).with_policy(self.overflow_policy)
    }

    /// Check the configuration for values the client cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("auth_timeout", self.auth_timeout),
            ("stale_timeout", self.stale_timeout),
            ("send_timeout", self.send_timeout),
            ("shutdown_grace", self.shutdown_grace),
            ("backoff.initial_delay", self.backoff.initial_delay),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if self.overflow_policy == OverflowPolicy::BlockWithTimeout(Duration::ZERO) {
            return Err(ConfigError::ZeroDuration {
                field: "block_timeout",
            });
        }

        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff.multiplier));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(ConfigError::InvalidJitter(self.backoff.jitter));
        }
        if self.backoff.initial_delay > self.backoff.max_delay {
            return Err(ConfigError::DelayBounds {
                initial: self.backoff.initial_delay,
                max: self.backoff.max_delay,
            });
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(())
    }
}
