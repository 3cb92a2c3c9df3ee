//! Observability hooks for connection lifecycle monitoring
//!
//! Hooks observe the client without consuming events, which makes them the
//! place to plug in metrics or custom logging.
//!
//! # Example
//!
//! ```
//! use tickwire_ws::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_state_change(|from, to| {
//!         println!("{from} -> {to}");
//!     })
//!     .on_reconnect_attempt(|attempt, delay| {
//!         println!("Reconnecting (attempt {}), waiting {:?}", attempt, delay);
//!     });
//! ```

use crate::connection::ConnectionState;
use crate::sink::{OverflowPolicy, SinkId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tickwire_types::DecodeError;

/// Type alias for hook callbacks
pub type StateChangeHook = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;
pub type ReconnectAttemptHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;
pub type DecodeErrorHook = Arc<dyn Fn(&DecodeError) + Send + Sync>;
pub type SinkOverflowHook = Arc<dyn Fn(SinkId, OverflowPolicy) + Send + Sync>;
pub type FrameHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Observability hooks container
///
/// All hooks are optional and run synchronously on the client's task. Keep
/// them fast.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) on_state_change: Option<StateChangeHook>,
    pub(crate) on_reconnect_attempt: Option<ReconnectAttemptHook>,
    pub(crate) on_decode_error: Option<DecodeErrorHook>,
    pub(crate) on_sink_overflow: Option<SinkOverflowHook>,
    pub(crate) on_frame: Option<FrameHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_state_change", &self.on_state_change.as_ref().map(|_| "..."))
            .field("on_reconnect_attempt", &self.on_reconnect_attempt.as_ref().map(|_| "..."))
            .field("on_decode_error", &self.on_decode_error.as_ref().map(|_| "..."))
            .field("on_sink_overflow", &self.on_sink_overflow.as_ref().map(|_| "..."))
            .field("on_frame", &self.on_frame.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Hooks {
    /// Create a new empty hooks container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for state transitions
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    /// Register a callback for reconnection attempts
    ///
    /// Called on entering Backoff with the attempt number (1-indexed) and the
    /// delay before the next connect.
    pub fn on_reconnect_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.on_reconnect_attempt = Some(Arc::new(f));
        self
    }

    /// Register a callback for frames dropped as undecodable
    pub fn on_decode_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecodeError) + Send + Sync + 'static,
    {
        self.on_decode_error = Some(Arc::new(f));
        self
    }

    /// Register a callback for events discarded by a sink's overflow policy
    pub fn on_sink_overflow<F>(mut self, f: F) -> Self
    where
        F: Fn(SinkId, OverflowPolicy) + Send + Sync + 'static,
    {
        self.on_sink_overflow = Some(Arc::new(f));
        self
    }

    /// Register a callback for received frames
    ///
    /// Called with the frame size in bytes. Useful for bandwidth monitoring.
    pub fn on_frame<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_frame = Some(Arc::new(f));
        self
    }

    pub(crate) fn invoke_state_change(&self, from: ConnectionState, to: ConnectionState) {
        if let Some(ref hook) = self.on_state_change {
            hook(from, to);
        }
    }

    pub(crate) fn invoke_reconnect_attempt(&self, attempt: u32, delay: Duration) {
        if let Some(ref hook) = self.on_reconnect_attempt {
            hook(attempt, delay);
        }
    }

    pub(crate) fn invoke_decode_error(&self, err: &DecodeError) {
        if let Some(ref hook) = self.on_decode_error {
            hook(err);
        }
    }

    pub(crate) fn invoke_sink_overflow(&self, sink: SinkId, policy: OverflowPolicy) {
        if let Some(ref hook) = self.on_sink_overflow {
            hook(sink, policy);
        }
    }

    pub(crate) fn invoke_frame(&self, size: usize) {
        if let Some(ref hook) = self.on_frame {
            hook(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_hooks_builder() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let hooks = Hooks::new().on_state_change(move |_, to| {
            if to == ConnectionState::Live {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        hooks.invoke_state_change(ConnectionState::Subscribing, ConnectionState::Live);
        hooks.invoke_state_change(ConnectionState::Live, ConnectionState::Backoff);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hooks_clone() {
        let hooks = Hooks::new().on_frame(|_| {}).on_decode_error(|_| {});

        let cloned = hooks.clone();
        assert!(cloned.on_frame.is_some());
        assert!(cloned.on_decode_error.is_some());
        assert!(cloned.on_sink_overflow.is_none());
    }

    #[test]
    fn test_hooks_default() {
        let hooks = Hooks::default();
        // Should not panic when invoking empty hooks
        hooks.invoke_reconnect_attempt(1, Duration::from_secs(1));
        hooks.invoke_decode_error(&DecodeError::MissingType);
        hooks.invoke_sink_overflow(SinkId(0), OverflowPolicy::DropOldest);
        assert!(format!("{hooks:?}").contains("on_frame"));
    }
}
