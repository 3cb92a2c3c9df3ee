//! Shared types for the tickwire streaming client
//!
//! This crate provides the core type definitions used across tickwire.
//! It has minimal dependencies and can be used independently.
//!
//! # Key Types
//!
//! - [`Symbol`] - Normalized ticker symbols (e.g., "AAPL")
//! - [`MarketEvent`] - Decoded trade, quote, error and heartbeat events
//! - [`InboundFrame`], [`SubscriptionFrame`], [`AuthFrame`] - Wire frames
//! - [`FeedError`], [`TransportError`], [`DecodeError`] - Error types
//! - [`ProviderErrorCode`], [`RecoveryStrategy`] - Provider error mapping

pub mod error;
pub mod error_codes;
pub mod event;
pub mod messages;
pub mod symbol;

// Re-export commonly used types
pub use error::*;
pub use error_codes::*;
pub use event::*;
pub use messages::*;
pub use symbol::*;

// Re-export rust_decimal for users
pub use rust_decimal::Decimal;
