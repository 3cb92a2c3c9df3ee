//! Resilient websocket client core for streaming market data
//!
//! This crate keeps a logical subscription set streaming over an unreliable
//! websocket and fans decoded events out to caller-supplied sinks.
//!
//! # Features
//!
//! - Explicit connection state machine (connect, authenticate, subscribe, live)
//! - Automatic reconnection with exponential backoff and jitter
//! - Subscription replay after every reconnect
//! - Fatal credential errors kept apart from recoverable failures
//! - Bounded per-sink queues with drop-oldest, drop-newest or blocking overflow
//!
//! # Example
//!
//! ```no_run
//! use tickwire_ws::{ClientConfig, Credentials, FeedClient, FnSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FeedClient::websocket(ClientConfig::new(), Credentials::from_env()?)?;
//!
//!     client.register_sink(FnSink::new(|event| println!("{:?}", event)), 1024);
//!     client.subscribe("AAPL")?;
//!
//!     let task = client.start()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.stop();
//!     task.await??;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod credentials;
pub mod dispatcher;
pub mod hooks;
pub mod reconnect;
pub mod sink;
pub mod subscription;
pub mod transport;

// Re-export main types
pub use config::{ClientConfig, ConfigError, DEFAULT_URL};
pub use connection::{ConnectionState, FeedClient};
pub use credentials::Credentials;
pub use dispatcher::{Dispatcher, Signal};
pub use hooks::Hooks;
pub use reconnect::{Backoff, BackoffPolicy};
pub use sink::{ChannelSink, FnSink, OverflowPolicy, Sink, SinkId, SinkOptions, SinkStats};
pub use subscription::{Subscription, SubscriptionRegistry};
pub use transport::{Transport, WsTransport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{MockHandle, MockTransport};

pub use tickwire_types::{FeedError, MarketEvent, Symbol};
