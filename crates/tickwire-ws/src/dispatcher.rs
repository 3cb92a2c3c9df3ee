//! Message dispatcher
//!
//! Decodes raw frames, fans market events out to registered sinks through
//! bounded per-sink queues, and reports control information (auth results,
//! acks, heartbeats) back to the connection state machine.

use crate::hooks::Hooks;
use crate::sink::{OverflowPolicy, Sink, SinkId, SinkOptions, SinkStats};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickwire_types::{FeedError, InboundFrame, MarketEvent, Symbol};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace, warn};

/// What a frame means to the connection state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Trades or quotes for these symbols were dispatched
    Data(Vec<Symbol>),
    /// Keep-alive
    Heartbeat,
    /// Token accepted
    AuthAccepted,
    /// Token refused
    AuthRejected {
        /// Provider error code
        code: Option<String>,
        /// Provider error text
        message: String,
    },
    /// Error frame outside the auth exchange
    ProviderError {
        /// Provider error code
        code: Option<String>,
        /// Provider error text
        message: String,
    },
    /// Subscription acknowledged
    Subscribed(Symbol),
    /// Unsubscription acknowledged
    Unsubscribed(Symbol),
    /// Malformed or unrecognized frame, dropped
    Ignored,
}

/// Result of pushing one event into a sink queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushOutcome {
    Queued,
    EvictedOldest,
    Rejected,
}

/// Bounded queue in front of one sink
struct SinkQueue {
    buf: Mutex<VecDeque<MarketEvent>>,
    capacity: usize,
    policy: OverflowPolicy,
    items: Notify,
    space: Notify,
    closed: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl SinkQueue {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            policy,
            items: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push without waiting; a full queue is resolved by the policy, except
    /// `BlockWithTimeout` which hands the event back.
    fn try_push(&self, event: MarketEvent) -> Result<PushOutcome, MarketEvent> {
        let outcome = {
            let mut buf = self.buf.lock();
            if buf.len() < self.capacity {
                buf.push_back(event);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        buf.pop_front();
                        buf.push_back(event);
                        PushOutcome::EvictedOldest
                    }
                    OverflowPolicy::DropNewest => PushOutcome::Rejected,
                    OverflowPolicy::BlockWithTimeout(_) => return Err(event),
                }
            }
        };

        match outcome {
            PushOutcome::Rejected => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::EvictedOldest => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.items.notify_one();
            }
            PushOutcome::Queued => self.items.notify_one(),
        }
        Ok(outcome)
    }

    /// Push one event. Blocking sinks wait at most until `started` plus
    /// their timeout, shared by every event of the same frame.
    async fn push(&self, event: MarketEvent, started: Instant) -> PushOutcome {
        let wait = match self.policy {
            OverflowPolicy::BlockWithTimeout(wait) => wait,
            _ => {
                return self
                    .try_push(event)
                    .unwrap_or(PushOutcome::Rejected);
            }
        };

        let deadline = started + wait;
        let mut event = event;
        loop {
            match self.try_push(event) {
                Ok(outcome) => return outcome,
                Err(back) => event = back,
            }

            if timeout_at(deadline, self.space.notified()).await.is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return PushOutcome::Rejected;
            }
        }
    }

    /// Next event, or `None` once closed and drained
    async fn pop(&self) -> Option<MarketEvent> {
        loop {
            let next = self.buf.lock().pop_front();
            if let Some(event) = next {
                self.space.notify_one();
                return Some(event);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.items.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.items.notify_one();
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            queued: self.buf.lock().len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct SinkSlot {
    queue: Arc<SinkQueue>,
    include_heartbeats: bool,
    task: JoinHandle<()>,
}

/// Decodes frames and routes events to sinks
pub struct Dispatcher {
    sinks: DashMap<SinkId, SinkSlot>,
    next_id: AtomicU64,
    default_policy: OverflowPolicy,
    hooks: Hooks,
}

impl Dispatcher {
    /// Create a dispatcher with no sinks
    pub fn new(default_policy: OverflowPolicy, hooks: Hooks) -> Self {
        Self {
            sinks: DashMap::new(),
            next_id: AtomicU64::new(0),
            default_policy,
            hooks,
        }
    }

    /// Register a sink with the default overflow policy.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime: the sink's delivery task is spawned
    /// here.
    pub fn register_sink(&self, sink: impl Sink, capacity: usize) -> SinkId {
        let options = SinkOptions::new(capacity).with_policy(self.default_policy);
        self.register_sink_with(sink, options)
    }

    /// Register a sink with explicit options. Same runtime requirement as
    /// [`register_sink`](Self::register_sink).
    pub fn register_sink_with(&self, sink: impl Sink, options: SinkOptions) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(SinkQueue::new(options.capacity, options.policy));

        let task = tokio::spawn(deliver(queue.clone(), Arc::new(sink)));

        debug!(
            sink = %id,
            capacity = options.capacity,
            policy = ?options.policy,
            "Sink registered"
        );

        self.sinks.insert(
            id,
            SinkSlot {
                queue,
                include_heartbeats: options.include_heartbeats,
                task,
            },
        );
        id
    }

    /// Remove a sink. Queued events are discarded.
    pub fn unregister_sink(&self, id: SinkId) -> bool {
        match self.sinks.remove(&id) {
            Some((_, slot)) => {
                slot.queue.close();
                slot.task.abort();
                debug!(sink = %id, "Sink unregistered");
                true
            }
            None => false,
        }
    }

    /// Number of registered sinks
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Delivery counters for a sink
    pub fn sink_stats(&self, id: SinkId) -> Option<SinkStats> {
        self.sinks.get(&id).map(|slot| slot.queue.stats())
    }

    /// Events a sink has lost to its overflow policy
    pub fn dropped_count(&self, id: SinkId) -> Option<u64> {
        self.sink_stats(id).map(|stats| stats.dropped)
    }

    /// Decode one frame and dispatch its events.
    ///
    /// Malformed frames are logged and dropped; they never produce an error.
    pub async fn on_frame(&self, raw: &str) -> Signal {
        self.hooks.invoke_frame(raw.len());

        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, len = raw.len(), "Dropping undecodable frame");
                self.hooks.invoke_decode_error(&err);
                return Signal::Ignored;
            }
        };

        let signal = match &frame {
            InboundFrame::Trades(_) | InboundFrame::Quotes(_) => {
                Signal::Data(frame.market_symbols().into_iter().cloned().collect())
            }
            InboundFrame::Ping => Signal::Heartbeat,
            InboundFrame::Error { code, message } => Signal::ProviderError {
                code: code.clone(),
                message: message.clone(),
            },
            InboundFrame::Auth {
                accepted: true, ..
            } => Signal::AuthAccepted,
            InboundFrame::Auth { code, message, .. } => Signal::AuthRejected {
                code: code.clone(),
                message: message.clone().unwrap_or_default(),
            },
            InboundFrame::Subscribed(symbol) => Signal::Subscribed(symbol.clone()),
            InboundFrame::Unsubscribed(symbol) => Signal::Unsubscribed(symbol.clone()),
            InboundFrame::Unknown(frame_type) => {
                debug!(frame_type = %frame_type, "Ignoring unknown frame type");
                Signal::Ignored
            }
        };

        self.dispatch(frame.into_events()).await;
        signal
    }

    /// Deliver events to every sink registered right now
    pub async fn dispatch(&self, events: Vec<MarketEvent>) {
        if events.is_empty() {
            return;
        }

        // Snapshot targets so no map guard is held across an await
        let targets: Vec<(SinkId, Arc<SinkQueue>, bool)> = self
            .sinks
            .iter()
            .map(|slot| (*slot.key(), slot.queue.clone(), slot.include_heartbeats))
            .collect();

        if targets.is_empty() {
            trace!(count = events.len(), "No sinks registered, events discarded");
            return;
        }

        let started = Instant::now();
        for event in events {
            for (id, queue, include_heartbeats) in &targets {
                if event.is_heartbeat() && !include_heartbeats {
                    continue;
                }

                match queue.push(event.clone(), started).await {
                    PushOutcome::Queued => {}
                    PushOutcome::EvictedOldest | PushOutcome::Rejected => {
                        let overflow = FeedError::SinkOverflow {
                            sink: id.as_u64(),
                            capacity: queue.capacity,
                        };
                        debug!(error = %overflow, policy = ?queue.policy, "Sink queue full");
                        self.hooks.invoke_sink_overflow(*id, queue.policy);
                    }
                }
            }
        }
    }

    /// Close every sink queue and wait up to `grace` for them to drain
    pub async fn close(&self, grace: Duration) {
        let ids: Vec<SinkId> = self.sinks.iter().map(|slot| *slot.key()).collect();
        let mut tasks = Vec::with_capacity(ids.len());

        for id in ids {
            if let Some((_, slot)) = self.sinks.remove(&id) {
                slot.queue.close();
                tasks.push(slot.task);
            }
        }

        if tasks.is_empty() {
            return;
        }

        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        if timeout(grace, futures::future::join_all(tasks)).await.is_err() {
            warn!(?grace, "Sinks did not drain in time, aborting delivery");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for slot in self.sinks.iter() {
            slot.queue.close();
        }
    }
}

async fn deliver(queue: Arc<SinkQueue>, sink: Arc<dyn Sink>) {
    while let Some(event) = queue.pop().await {
        sink.on_event(event).await;
        queue.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, FnSink};
    use std::sync::atomic::AtomicUsize;
    use tickwire_types::Decimal;

    const TRADE_3: &str = r#"{"type":"trade","data":[
        {"s":"AAPL","p":1,"v":1,"t":1},
        {"s":"AAPL","p":2,"v":1,"t":2},
        {"s":"AAPL","p":3,"v":1,"t":3}
    ]}"#;

    fn price(event: &MarketEvent) -> Decimal {
        match event {
            MarketEvent::Trade { price, .. } => *price,
            other => panic!("expected trade, got {other:?}"),
        }
    }

    async fn drain(rx: &mut tokio::sync::mpsc::Receiver<MarketEvent>) -> Vec<MarketEvent> {
        let mut out = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_millis(50), rx.recv()).await {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_most_recent() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let (sink, mut rx) = ChannelSink::new(16);
        let id = dispatcher.register_sink(sink, 2);

        // Current-thread runtime: the delivery task cannot run until we yield,
        // so all three land in the queue before the sink drains any.
        let signal = dispatcher.on_frame(TRADE_3).await;
        assert!(matches!(signal, Signal::Data(ref symbols) if symbols.len() == 3));

        let received = drain(&mut rx).await;
        let prices: Vec<_> = received.iter().map(price).collect();
        assert_eq!(prices, vec![Decimal::from(2), Decimal::from(3)]);
        assert_eq!(dispatcher.dropped_count(id), Some(1));
    }

    #[tokio::test]
    async fn test_drop_newest_keeps_first() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let (sink, mut rx) = ChannelSink::new(16);
        let id = dispatcher
            .register_sink_with(sink, SinkOptions::new(2).with_policy(OverflowPolicy::DropNewest));

        dispatcher.on_frame(TRADE_3).await;

        let prices: Vec<_> = drain(&mut rx).await.iter().map(price).collect();
        assert_eq!(prices, vec![Decimal::from(1), Decimal::from(2)]);
        assert_eq!(dispatcher.sink_stats(id).unwrap().dropped, 1);
    }

    #[tokio::test]
    async fn test_block_with_timeout_waits_for_room() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let (sink, mut rx) = ChannelSink::new(16);
        let options = SinkOptions::new(1)
            .with_policy(OverflowPolicy::BlockWithTimeout(Duration::from_secs(1)));
        let id = dispatcher.register_sink_with(sink, options);

        dispatcher.on_frame(TRADE_3).await;

        let prices: Vec<_> = drain(&mut rx).await.iter().map(price).collect();
        assert_eq!(prices, vec![Decimal::from(1), Decimal::from(2), Decimal::from(3)]);
        assert_eq!(dispatcher.dropped_count(id), Some(0));
    }

    #[tokio::test]
    async fn test_block_with_timeout_gives_up() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        // A sink that never finishes its first event
        struct Stuck;
        #[async_trait::async_trait]
        impl Sink for Stuck {
            async fn on_event(&self, _event: MarketEvent) {
                std::future::pending::<()>().await;
            }
        }

        let options = SinkOptions::new(1)
            .with_policy(OverflowPolicy::BlockWithTimeout(Duration::from_millis(20)));
        let id = dispatcher.register_sink_with(Stuck, options);

        dispatcher.on_frame(TRADE_3).await;

        // First event is stuck in the sink, second sits in the queue, third
        // times out
        assert_eq!(dispatcher.dropped_count(id), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_timeout_bounds_whole_frame() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        struct Stuck;
        #[async_trait::async_trait]
        impl Sink for Stuck {
            async fn on_event(&self, _event: MarketEvent) {
                std::future::pending::<()>().await;
            }
        }

        let wait = Duration::from_millis(100);
        let options = SinkOptions::new(1).with_policy(OverflowPolicy::BlockWithTimeout(wait));
        let id = dispatcher.register_sink_with(Stuck, options);

        let trades: Vec<String> = (1..=10)
            .map(|i| format!(r#"{{"s":"AAPL","p":{i},"v":1,"t":{i}}}"#))
            .collect();
        let frame = format!(r#"{{"type":"trade","data":[{}]}}"#, trades.join(","));

        let started = Instant::now();
        dispatcher.on_frame(&frame).await;

        // One in the sink, one queued, the other eight share a single wait
        assert_eq!(dispatcher.dropped_count(id), Some(8));
        assert!(started.elapsed() < wait * 2, "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_no_delivery_before_registration() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        dispatcher.on_frame(TRADE_3).await;

        let (sink, mut rx) = ChannelSink::new(16);
        dispatcher.register_sink(sink, 8);
        dispatcher
            .on_frame(r#"{"type":"trade","data":[{"s":"AAPL","p":9,"v":1,"t":9}]}"#)
            .await;

        let prices: Vec<_> = drain(&mut rx).await.iter().map(price).collect();
        assert_eq!(prices, vec![Decimal::from(9)]);
    }

    #[tokio::test]
    async fn test_each_sink_gets_each_event_once() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let (a, mut rx_a) = ChannelSink::new(16);
        let (b, mut rx_b) = ChannelSink::new(16);
        dispatcher.register_sink(a, 8);
        dispatcher.register_sink(b, 8);

        dispatcher.on_frame(TRADE_3).await;

        assert_eq!(drain(&mut rx_a).await.len(), 3);
        assert_eq!(drain(&mut rx_b).await.len(), 3);
    }

    #[tokio::test]
    async fn test_heartbeats_opt_in() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let (plain, mut rx_plain) = ChannelSink::new(16);
        let (beats, mut rx_beats) = ChannelSink::new(16);
        dispatcher.register_sink(plain, 8);
        dispatcher.register_sink_with(beats, SinkOptions::new(8).with_heartbeats(true));

        assert_eq!(dispatcher.on_frame(r#"{"type":"ping"}"#).await, Signal::Heartbeat);

        assert!(drain(&mut rx_plain).await.is_empty());
        assert_eq!(drain(&mut rx_beats).await, vec![MarketEvent::Heartbeat]);
    }

    #[tokio::test]
    async fn test_malformed_frames_ignored() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let hooks = Hooks::new().on_decode_error(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, hooks);
        let (sink, mut rx) = ChannelSink::new(16);
        dispatcher.register_sink(sink, 8);

        assert_eq!(dispatcher.on_frame("garbage").await, Signal::Ignored);
        assert_eq!(dispatcher.on_frame(r#"{"type":"trade"}"#).await, Signal::Ignored);
        assert_eq!(dispatcher.on_frame(r#"{"type":"news"}"#).await, Signal::Ignored);

        assert!(drain(&mut rx).await.is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_control_signals() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());

        assert_eq!(
            dispatcher.on_frame(r#"{"type":"auth","status":"ok"}"#).await,
            Signal::AuthAccepted
        );
        assert_eq!(
            dispatcher
                .on_frame(r#"{"type":"subscribed","symbol":"aapl"}"#)
                .await,
            Signal::Subscribed(Symbol::parse("AAPL").unwrap())
        );
        assert!(matches!(
            dispatcher
                .on_frame(r#"{"type":"error","msg":"Invalid API key"}"#)
                .await,
            Signal::ProviderError { .. }
        ));
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let id = dispatcher.register_sink(
            FnSink::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            8,
        );

        assert!(dispatcher.unregister_sink(id));
        assert!(!dispatcher.unregister_sink(id));
        dispatcher.on_frame(TRADE_3).await;
        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.sink_count(), 0);
    }

    #[tokio::test]
    async fn test_close_drains_queues() {
        let dispatcher = Dispatcher::new(OverflowPolicy::DropOldest, Hooks::new());
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        dispatcher.register_sink(
            FnSink::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            8,
        );

        dispatcher.on_frame(TRADE_3).await;
        dispatcher.close(Duration::from_secs(1)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.sink_count(), 0);
    }
}
