//! Event sinks
//!
//! A sink is the caller's consumer of decoded [`MarketEvent`]s. Every sink
//! gets its own bounded queue and delivery task, so a slow sink only ever
//! slows down its own stream.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tickwire_types::MarketEvent;
use tokio::sync::mpsc;

/// Consumer of market events
///
/// Called from the sink's own delivery task, once per event, in arrival order.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Handle one event
    async fn on_event(&self, event: MarketEvent);
}

/// Identifier returned by sink registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub(crate) u64);

impl SinkId {
    /// Raw numeric id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// What to do when a sink's queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room (market data favors recency)
    #[default]
    DropOldest,
    /// Discard the incoming event
    DropNewest,
    /// Wait up to the timeout for room, then discard the incoming event
    BlockWithTimeout(Duration),
}

/// Per-sink registration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOptions {
    /// Queue capacity (at least 1)
    pub capacity: usize,
    /// Overflow policy
    pub policy: OverflowPolicy,
    /// Forward heartbeat events to this sink
    pub include_heartbeats: bool,
}

impl SinkOptions {
    /// Options with the given capacity and default policy
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            policy: OverflowPolicy::default(),
            include_heartbeats: false,
        }
    }

    /// Set overflow policy
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Receive heartbeats too
    pub fn with_heartbeats(mut self, include: bool) -> Self {
        self.include_heartbeats = include;
        self
    }
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Delivery counters for one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkStats {
    /// Events currently waiting in the queue
    pub queued: usize,
    /// Events handed to the sink
    pub delivered: u64,
    /// Events discarded by the overflow policy
    pub dropped: u64,
}

/// Sink backed by a synchronous closure
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(MarketEvent) + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Sink for FnSink<F>
where
    F: Fn(MarketEvent) + Send + Sync + 'static,
{
    async fn on_event(&self, event: MarketEvent) {
        (self.f)(event);
    }
}

/// Sink that forwards into a bounded tokio channel
///
/// When the receiver falls behind, `on_event` waits, which backs up the
/// sink's own queue and lets its overflow policy take over.
pub struct ChannelSink {
    tx: mpsc::Sender<MarketEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<MarketEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn on_event(&self, event: MarketEvent) {
        // Receiver gone means the consumer stopped listening
        let _ = self.tx.send(event).await;
    }
}
