//! Error types for the tickwire client

use std::time::Duration;
use thiserror::Error;

use crate::error_codes::{ProviderErrorCode, RecoveryStrategy};
use crate::symbol::SymbolError;

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// Not connected
    #[error("not connected")]
    NotConnected,

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A single inbound frame could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not valid JSON, or JSON of the wrong shape
    #[error("invalid JSON: {message}")]
    InvalidJson { message: String },

    /// JSON object without a string `type` field
    #[error("frame has no type tag")]
    MissingType,

    /// Known frame type whose payload did not match
    #[error("malformed {frame_type} frame: {message}")]
    Malformed { frame_type: String, message: String },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson {
            message: err.to_string(),
        }
    }
}

/// Main error type for client operations
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    // === Connection Errors ===
    /// Transport failed (recoverable, triggers backoff)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No frame received within the staleness threshold
    #[error("no frame received for {idle:?}")]
    StaleConnection { idle: Duration },

    /// Reconnection attempts exhausted
    #[error("reconnection attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    // === Authentication Errors ===
    /// Authentication refused for a transient reason (e.g. rate limiting)
    #[error("authentication rejected: {message}")]
    AuthRejected {
        code: Option<String>,
        message: String,
    },

    /// Authentication refused because the credentials are bad
    #[error("authentication failed: {message}")]
    AuthFatal {
        code: Option<String>,
        message: String,
    },

    /// No auth acknowledgement within the timeout
    #[error("no auth acknowledgement within {0:?}")]
    AuthTimeout(Duration),

    // === Frame & Sink Errors ===
    /// Frame could not be decoded (logged and dropped)
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Sink queue full (handled by the sink's overflow policy)
    #[error("sink {sink} overflowed its queue of {capacity}")]
    SinkOverflow { sink: u64, capacity: usize },

    // === Usage Errors ===
    /// Symbol rejected
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `start()` called twice
    #[error("client already started")]
    AlreadyStarted,

    /// Client is closed
    #[error("client is closed")]
    Closed,

    /// Internal channel was closed unexpectedly
    #[error("internal channel closed unexpectedly")]
    ChannelClosed,
}

impl FeedError {
    /// Build an auth error from an error frame, classifying it as fatal or
    /// recoverable
    pub fn auth(code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        match crate::error_codes::auth_recovery(code.as_deref(), &message) {
            RecoveryStrategy::Fatal => Self::AuthFatal { code, message },
            _ => Self::AuthRejected { code, message },
        }
    }

    /// Get the recovery strategy for this error
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            Self::Transport(_)
            | Self::StaleConnection { .. }
            | Self::AuthRejected { .. }
            | Self::AuthTimeout(_) => RecoveryStrategy::Backoff,
            Self::Decode(_) | Self::SinkOverflow { .. } => RecoveryStrategy::Skip,
            Self::AuthFatal { .. }
            | Self::ReconnectExhausted { .. }
            | Self::InvalidSymbol(_)
            | Self::Configuration(_)
            | Self::AlreadyStarted
            | Self::Closed
            | Self::ChannelClosed => RecoveryStrategy::Fatal,
        }
    }

    /// Returns true if the client should back off and reconnect
    pub fn is_retryable(&self) -> bool {
        self.recovery_strategy().allows_retry()
    }

    /// Returns true if this error ends the client
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthFatal { .. } | Self::ReconnectExhausted { .. } | Self::ChannelClosed
        )
    }

    /// Provider error code, for auth errors
    pub fn provider_code(&self) -> Option<ProviderErrorCode> {
        match self {
            Self::AuthRejected { code, message } | Self::AuthFatal { code, message } => {
                ProviderErrorCode::parse(code.as_deref(), message)
            }
            _ => None,
        }
    }
}

/// Result type alias for client operations
pub type FeedResult<T> = Result<T, FeedError>;
