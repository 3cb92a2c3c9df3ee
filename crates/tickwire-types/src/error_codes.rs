//! Provider error code mapping with recovery strategies
//!
//! Error frames carry a free-form `msg` and, for some providers, a `code`.
//! Both are inspected to decide whether the client should back off and retry
//! or give up.

/// Recovery strategy for handling provider errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryStrategy {
    /// Reconnect after the backoff delay
    Backoff,
    /// Cannot recover programmatically - terminal
    Fatal,
    /// Skip this frame and continue
    #[default]
    Skip,
}

impl RecoveryStrategy {
    /// Check if this strategy allows retry
    pub fn allows_retry(&self) -> bool {
        matches!(self, Self::Backoff)
    }
}

/// Known provider error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Token is malformed, revoked or unknown
    InvalidToken,
    /// Token is valid but lacks access to the feed
    Forbidden,
    /// Too many requests or connections
    RateLimited,
    /// Subscription limit for the plan was reached
    SubscriptionLimit,
    /// Symbol is not served by the provider
    InvalidSymbol,
    /// Provider-side failure
    ServiceUnavailable,
}

impl ProviderErrorCode {
    /// Map an explicit error code (numeric or textual)
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "401" | "invalid_token" | "invalid_api_key" | "unauthorized" => {
                Some(Self::InvalidToken)
            }
            "403" | "forbidden" => Some(Self::Forbidden),
            "429" | "rate_limited" | "too_many_requests" => Some(Self::RateLimited),
            "subscription_limit" => Some(Self::SubscriptionLimit),
            "invalid_symbol" | "unknown_symbol" => Some(Self::InvalidSymbol),
            "500" | "502" | "503" | "service_unavailable" => Some(Self::ServiceUnavailable),
            _ => None,
        }
    }

    /// Map a human readable message by substring
    pub fn from_message(message: &str) -> Option<Self> {
        let lower = message.to_ascii_lowercase();

        if lower.contains("invalid api key")
            || lower.contains("invalid token")
            || lower.contains("unauthorized")
        {
            Some(Self::InvalidToken)
        } else if lower.contains("forbidden") || lower.contains("access denied") {
            Some(Self::Forbidden)
        } else if lower.contains("rate limit") || lower.contains("too many") {
            Some(Self::RateLimited)
        } else if lower.contains("subscription limit") {
            Some(Self::SubscriptionLimit)
        } else if lower.contains("invalid symbol") || lower.contains("unknown symbol") {
            Some(Self::InvalidSymbol)
        } else if lower.contains("unavailable") || lower.contains("internal error") {
            Some(Self::ServiceUnavailable)
        } else {
            None
        }
    }

    /// Classify an error frame, preferring the explicit code
    pub fn parse(code: Option<&str>, message: &str) -> Option<Self> {
        code.and_then(Self::from_code)
            .or_else(|| Self::from_message(message))
    }

    /// Get the recovery strategy for this error code
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            Self::InvalidToken | Self::Forbidden => RecoveryStrategy::Fatal,
            Self::RateLimited | Self::ServiceUnavailable => RecoveryStrategy::Backoff,
            Self::SubscriptionLimit | Self::InvalidSymbol => RecoveryStrategy::Skip,
        }
    }

    /// Check if this is a credential error
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::Forbidden)
    }

    /// Short description of the error
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid or revoked API token",
            Self::Forbidden => "token has no access to this feed",
            Self::RateLimited => "rate limited by provider",
            Self::SubscriptionLimit => "subscription limit reached",
            Self::InvalidSymbol => "symbol not served by provider",
            Self::ServiceUnavailable => "provider unavailable",
        }
    }
}

/// Recovery for an error frame received while authenticating.
///
/// Unrecognized errors are retried with backoff; only credential errors are
/// terminal.
pub fn auth_recovery(code: Option<&str>, message: &str) -> RecoveryStrategy {
    match ProviderErrorCode::parse(code, message) {
        Some(code) if code.is_auth_error() => RecoveryStrategy::Fatal,
        _ => RecoveryStrategy::Backoff,
    }
}
