//! Connection state machine
//!
//! [`FeedClient`] owns one transport and keeps one logical subscription set
//! streaming across disconnects. All state lives in a single driver task;
//! caller-facing methods only enqueue commands for it.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Subscribing -> Live
//!                     ^              |                 |          |
//!                     |              v                 v          v
//!                     +---------- Backoff <------------+----------+
//!
//! any state -> Closed (stop, fatal auth error, reconnect budget spent)
//! ```

use crate::config::ClientConfig;
use crate::credentials::Credentials;
use crate::dispatcher::{Dispatcher, Signal};
use crate::hooks::Hooks;
use crate::reconnect::Backoff;
use crate::sink::{Sink, SinkId, SinkOptions, SinkStats};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::transport::{Transport, WsTransport};

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tickwire_types::{
    FeedError, ProviderErrorCode, RecoveryStrategy, SubscriptionFrame, Symbol, TransportError,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};


/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Token sent, waiting for the provider to accept it
    Authenticating,
    /// Subscribe frames sent, waiting for acknowledgements
    Subscribing,
    /// Every requested symbol acknowledged
    Live,
    /// Waiting before the next connect attempt
    Backoff,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// True while a transport connection is open
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Authenticating | Self::Subscribing | Self::Live
        )
    }

    /// True once no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        *self == Self::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Backoff => "backoff",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Requests from the caller to the driver task
#[derive(Debug)]
enum Command {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
    Stop,
}

struct Inner {
    config: ClientConfig,
    credentials: Credentials,
    hooks: Hooks,
    dispatcher: Dispatcher,
    registry: RwLock<SubscriptionRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    command_tx: mpsc::UnboundedSender<Command>,
    /// Handed to the driver on start
    parts: Mutex<Option<(Box<dyn Transport>, mpsc::UnboundedReceiver<Command>)>>,
    closed: AtomicBool,
}

/// Streaming market-data client
///
/// Cheap to clone; every clone controls the same connection.
///
/// # Example
///
/// ```no_run
/// use tickwire_ws::{ClientConfig, Credentials, FeedClient, FnSink};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = FeedClient::websocket(ClientConfig::new(), Credentials::from_env()?)?;
/// client.register_sink(FnSink::new(|event| println!("{:?}", event)), 1024);
/// client.subscribe("AAPL")?;
///
/// let task = client.start()?;
/// tokio::signal::ctrl_c().await?;
/// client.stop();
/// task.await??;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FeedClient {
    inner: Arc<Inner>,
}

impl FeedClient {
    /// Create a client over the given transport
    pub fn new(
        config: ClientConfig,
        credentials: Credentials,
        transport: impl Transport + 'static,
    ) -> Result<Self, FeedError> {
        Self::with_hooks(config, credentials, transport, Hooks::default())
    }

    /// Create a client over a real websocket
    pub fn websocket(config: ClientConfig, credentials: Credentials) -> Result<Self, FeedError> {
        let transport = WsTransport::new().with_timeout(config.connect_timeout);
        Self::new(config, credentials, transport)
    }

    /// Create a client with observability hooks
    pub fn with_hooks(
        config: ClientConfig,
        credentials: Credentials,
        transport: impl Transport + 'static,
        hooks: Hooks,
    ) -> Result<Self, FeedError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let transport: Box<dyn Transport> = Box::new(transport);

        Ok(Self {
            inner: Arc::new(Inner {
                dispatcher: Dispatcher::new(config.overflow_policy, hooks.clone()),
                config,
                credentials,
                hooks,
                registry: RwLock::new(SubscriptionRegistry::new()),
                state_tx,
                command_tx,
                parts: Mutex::new(Some((transport, command_rx))),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the connection task.
    ///
    /// The task resolves to `Ok(())` after [`stop`](Self::stop) and to the
    /// terminal error otherwise.
    pub fn start(&self) -> Result<JoinHandle<Result<(), FeedError>>, FeedError> {
        let driver = self.take_driver()?;
        Ok(tokio::spawn(driver.run()))
    }

    /// Run the connection on the current task until stopped or failed
    pub async fn run(&self) -> Result<(), FeedError> {
        self.take_driver()?.run().await
    }

    /// Close the client. Idempotent.
    ///
    /// Cancels any backoff timer or in-flight connect; the transport gets the
    /// configured grace period to close.
    pub fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Stop requested");

        // Never started: nothing to wind down
        if self.inner.parts.lock().take().is_some() {
            self.inner.state_tx.send_replace(ConnectionState::Closed);
            return;
        }

        let _ = self.inner.command_tx.send(Command::Stop);
    }

    /// Request streaming for a symbol
    pub fn subscribe(&self, symbol: &str) -> Result<(), FeedError> {
        let symbol = Symbol::parse(symbol)?;
        self.send_command(Command::Subscribe(symbol))
    }

    /// Stop streaming a symbol
    pub fn unsubscribe(&self, symbol: &str) -> Result<(), FeedError> {
        let symbol = Symbol::parse(symbol)?;
        self.send_command(Command::Unsubscribe(symbol))
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state changes
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Check if every subscription is streaming
    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Live
    }

    /// Active subscriptions as applied by the connection task
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.registry.read().snapshot()
    }

    /// Register a sink with the configured overflow policy
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime: the sink's delivery task is spawned
    /// here.
    pub fn register_sink(&self, sink: impl Sink, capacity: usize) -> SinkId {
        self.inner.dispatcher.register_sink(sink, capacity)
    }

    /// Register a sink with explicit options
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime, like [`register_sink`](Self::register_sink).
    pub fn register_sink_with(&self, sink: impl Sink, options: SinkOptions) -> SinkId {
        self.inner.dispatcher.register_sink_with(sink, options)
    }

    /// Remove a sink
    pub fn unregister_sink(&self, id: SinkId) -> bool {
        self.inner.dispatcher.unregister_sink(id)
    }

    /// Events a sink has lost to its overflow policy
    pub fn dropped_count(&self, id: SinkId) -> Option<u64> {
        self.inner.dispatcher.dropped_count(id)
    }

    /// Delivery counters for a sink
    pub fn sink_stats(&self, id: SinkId) -> Option<SinkStats> {
        self.inner.dispatcher.sink_stats(id)
    }

    /// The configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn send_command(&self, command: Command) -> Result<(), FeedError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }
        // Receiver gone without a close: the driver task was aborted
        self.inner
            .command_tx
            .send(command)
            .map_err(|_| FeedError::ChannelClosed)
    }

    fn take_driver(&self) -> Result<Driver, FeedError> {
        let mut parts = self.inner.parts.lock();
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FeedError::Closed);
        }
        let (transport, commands) = parts.take().ok_or(FeedError::AlreadyStarted)?;

        Ok(Driver {
            backoff: Backoff::new(self.inner.config.backoff.clone()),
            inner: self.inner.clone(),
            transport,
            commands,
            deferred: VecDeque::new(),
            state: ConnectionState::Disconnected,
        })
    }
}

impl fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("subscriptions", &self.inner.registry.read().len())
            .field("sinks", &self.inner.dispatcher.sink_count())
            .finish()
    }
}

/// How a phase of the lifecycle ended
#[derive(Debug)]
enum Flow {
    /// Move on to the next phase
    Proceed,
    /// Recoverable failure, back off and reconnect
    Retry(FeedError),
    /// Caller asked to stop
    Stop,
    /// Terminal failure
    Fatal(FeedError),
}

/// One wake-up of the connected loop
enum Step {
    Command(Option<Command>),
    Frame(Result<Option<String>, TransportError>),
    Timer,
}

/// The single task that owns the transport and mutates connection state
struct Driver {
    inner: Arc<Inner>,
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Commands that arrived while a frame was being written
    deferred: VecDeque<Command>,
    backoff: Backoff,
    state: ConnectionState,
}

impl Driver {
    async fn run(mut self) -> Result<(), FeedError> {
        // Commands issued before start only touch the registry
        while let Ok(command) = self.commands.try_recv() {
            if !apply_offline(&self.inner, Some(command)) {
                return self.finish(Ok(())).await;
            }
        }

        let outcome = loop {
            let mut flow = self.connect().await;
            if let Flow::Proceed = flow {
                flow = self.authenticate().await;
            }
            if let Flow::Proceed = flow {
                flow = self.stream().await;
            }

            match flow {
                Flow::Proceed => {}
                Flow::Retry(err) => match self.back_off(err).await {
                    Flow::Proceed => {}
                    Flow::Stop => break Ok(()),
                    Flow::Fatal(err) | Flow::Retry(err) => break Err(err),
                },
                Flow::Stop => break Ok(()),
                Flow::Fatal(err) => break Err(err),
            }
        };

        self.finish(outcome).await
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        self.inner.state_tx.send_replace(to);
        debug!(%from, %to, "State transition");
        self.inner.hooks.invoke_state_change(from, to);
    }

    async fn connect(&mut self) -> Flow {
        self.transition(ConnectionState::Connecting);

        let url = self.inner.config.url.as_str();
        let limit = self.inner.config.connect_timeout;
        info!(url, "Connecting");

        let connect = timeout(limit, self.transport.connect(url));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    if !apply_offline(&self.inner, command) {
                        return Flow::Stop;
                    }
                }
                result = &mut connect => {
                    return match result {
                        Ok(Ok(())) => Flow::Proceed,
                        Ok(Err(err)) => Flow::Retry(err.into()),
                        Err(_) => Flow::Retry(TransportError::Timeout(limit).into()),
                    };
                }
            }
        }
    }

    async fn authenticate(&mut self) -> Flow {
        self.transition(ConnectionState::Authenticating);

        let frame = match self.inner.credentials.auth_frame() {
            Ok(frame) => frame,
            Err(err) => return Flow::Fatal(FeedError::Configuration(err.to_string())),
        };
        match self.send_frame(&frame).await {
            Flow::Proceed => debug!("Auth frame sent"),
            flow => return flow,
        }

        let limit = self.inner.config.auth_timeout;
        let deadline = Instant::now() + limit;

        loop {
            match self.next_step(deadline).await {
                Step::Timer => return Flow::Retry(FeedError::AuthTimeout(limit)),
                Step::Command(command) => {
                    if let Some(flow) = self.on_command(command).await {
                        return flow;
                    }
                }
                Step::Frame(Ok(Some(raw))) => match self.inner.dispatcher.on_frame(&raw).await {
                    Signal::AuthAccepted => {
                        info!("Authenticated");
                        return Flow::Proceed;
                    }
                    // No explicit ack from this provider: live traffic means
                    // the token was accepted
                    Signal::Data(_) | Signal::Heartbeat => {
                        debug!("Traffic before auth ack, treating token as accepted");
                        return Flow::Proceed;
                    }
                    Signal::AuthRejected { code, message }
                    | Signal::ProviderError { code, message } => {
                        let err = FeedError::auth(code, message);
                        return if err.is_fatal() {
                            error!(error = %err, "Token rejected");
                            Flow::Fatal(err)
                        } else {
                            warn!(error = %err, "Authentication failed");
                            Flow::Retry(err)
                        };
                    }
                    Signal::Subscribed(_) | Signal::Unsubscribed(_) | Signal::Ignored => {}
                },
                Step::Frame(Ok(None)) => {
                    return Flow::Retry(TransportError::ConnectionClosed.into());
                }
                Step::Frame(Err(err)) => return Flow::Retry(err.into()),
            }
        }
    }

    /// Subscribing and Live
    async fn stream(&mut self) -> Flow {
        self.transition(ConnectionState::Subscribing);

        let symbols = self.inner.registry.write().reconcile();
        for symbol in &symbols {
            match self.send_subscription(SubscriptionFrame::subscribe(symbol)).await {
                Flow::Proceed => {}
                flow => return flow,
            }
        }
        info!(count = symbols.len(), "Subscriptions sent");
        self.check_acked();

        let stale = self.inner.config.stale_timeout;
        let mut deadline = Instant::now() + stale;

        loop {
            match self.next_step(deadline).await {
                Step::Timer => {
                    warn!(idle = ?stale, "No frames received, connection is stale");
                    return Flow::Retry(FeedError::StaleConnection { idle: stale });
                }
                Step::Command(command) => {
                    if let Some(flow) = self.on_command(command).await {
                        return flow;
                    }
                }
                Step::Frame(Ok(Some(raw))) => {
                    deadline = Instant::now() + stale;
                    let signal = self.inner.dispatcher.on_frame(&raw).await;
                    if let Some(flow) = self.on_signal(signal) {
                        return flow;
                    }
                }
                Step::Frame(Ok(None)) => {
                    warn!("Server closed connection");
                    return Flow::Retry(TransportError::ConnectionClosed.into());
                }
                Step::Frame(Err(err)) => {
                    warn!(error = %err, "Transport error");
                    return Flow::Retry(err.into());
                }
            }
            self.check_acked();
        }
    }

    fn on_signal(&mut self, signal: Signal) -> Option<Flow> {
        match signal {
            Signal::Data(symbols) => {
                let mut registry = self.inner.registry.write();
                for symbol in &symbols {
                    if registry.ack(symbol) {
                        debug!(%symbol, "First data frame, subscription acknowledged");
                    }
                }
            }
            Signal::Subscribed(symbol) => {
                if self.inner.registry.write().ack(&symbol) {
                    debug!(%symbol, "Subscription acknowledged");
                }
            }
            Signal::Unsubscribed(symbol) => debug!(%symbol, "Unsubscription acknowledged"),
            Signal::AuthRejected { code, message } => {
                let err = FeedError::auth(code, message);
                error!(error = %err, "Token rejected");
                return Some(if err.is_fatal() {
                    Flow::Fatal(err)
                } else {
                    Flow::Retry(err)
                });
            }
            Signal::ProviderError { code, message } => {
                let provider = ProviderErrorCode::parse(code.as_deref(), &message);
                let strategy = provider
                    .map(|p| p.recovery_strategy())
                    .unwrap_or_default();
                match strategy {
                    RecoveryStrategy::Fatal => {
                        let err = FeedError::auth(code, message);
                        error!(error = %err, "Provider revoked access");
                        return Some(Flow::Fatal(err));
                    }
                    RecoveryStrategy::Backoff => {
                        warn!(?provider, detail = %message, "Provider asked us to back off");
                        return Some(Flow::Retry(FeedError::AuthRejected { code, message }));
                    }
                    RecoveryStrategy::Skip => {
                        warn!(?provider, detail = %message, "Provider error");
                    }
                }
            }
            Signal::AuthAccepted | Signal::Heartbeat | Signal::Ignored => {}
        }
        None
    }

    fn check_acked(&mut self) {
        if self.state != ConnectionState::Subscribing {
            return;
        }
        if !self.inner.registry.read().is_fully_acked() {
            return;
        }

        self.backoff.reset();
        self.transition(ConnectionState::Live);
        info!(
            subscriptions = self.inner.registry.read().len(),
            "Live"
        );
    }

    /// Apply a command while connected. Returns the flow to leave the phase
    /// with, if any.
    async fn on_command(&mut self, command: Option<Command>) -> Option<Flow> {
        // Before Subscribing the reconcile will carry registry changes
        if !matches!(
            self.state,
            ConnectionState::Subscribing | ConnectionState::Live
        ) {
            return (!apply_offline(&self.inner, command)).then_some(Flow::Stop);
        }

        let flow = match command {
            None | Some(Command::Stop) => return Some(Flow::Stop),
            Some(Command::Subscribe(symbol)) => {
                let added = self.inner.registry.write().add(symbol.clone());
                if !added {
                    return None;
                }
                let flow = self
                    .send_subscription(SubscriptionFrame::subscribe(&symbol))
                    .await;
                self.transition(ConnectionState::Subscribing);
                flow
            }
            Some(Command::Unsubscribe(symbol)) => {
                let removed = self.inner.registry.write().remove(&symbol);
                if !removed {
                    return None;
                }
                self.send_subscription(SubscriptionFrame::unsubscribe(&symbol))
                    .await
            }
        };

        match flow {
            Flow::Proceed => None,
            flow => Some(flow),
        }
    }

    async fn send_subscription(&mut self, frame: SubscriptionFrame<'_>) -> Flow {
        let json = match frame.to_json() {
            Ok(json) => json,
            Err(err) => return Flow::Retry(TransportError::Protocol(err.to_string()).into()),
        };
        debug!(frame = %json, "Sending subscription");
        self.send_frame(&json).await
    }

    /// Write one frame within `send_timeout`. A stop request cancels the
    /// write; other commands are held until the write finishes.
    async fn send_frame(&mut self, frame: &str) -> Flow {
        let limit = self.inner.config.send_timeout;
        let send = timeout(limit, self.transport.send(frame));
        tokio::pin!(send);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    None | Some(Command::Stop) => return Flow::Stop,
                    Some(command) => self.deferred.push_back(command),
                },
                result = &mut send => {
                    return match result {
                        Ok(Ok(())) => Flow::Proceed,
                        Ok(Err(err)) => Flow::Retry(err.into()),
                        Err(_) => {
                            warn!(?limit, "Frame write timed out");
                            Flow::Retry(TransportError::Timeout(limit).into())
                        }
                    };
                }
            }
        }
    }

    async fn next_step(&mut self, deadline: Instant) -> Step {
        if let Some(command) = self.deferred.pop_front() {
            return Step::Command(Some(command));
        }

        tokio::select! {
            biased;
            command = self.commands.recv() => Step::Command(command),
            frame = self.transport.recv() => Step::Frame(frame),
            _ = sleep_until(deadline) => Step::Timer,
        }
    }

    async fn back_off(&mut self, err: FeedError) -> Flow {
        self.close_transport().await;
        self.transition(ConnectionState::Backoff);

        // Held commands are replayed by the next reconcile
        while let Some(command) = self.deferred.pop_front() {
            apply_offline(&self.inner, Some(command));
        }

        let Some(delay) = self.backoff.on_failure() else {
            let attempts = self.backoff.attempt();
            error!(attempts, error = %err, "Reconnection attempts exhausted");
            return Flow::Fatal(FeedError::ReconnectExhausted { attempts });
        };

        let attempt = self.backoff.attempt();
        warn!(attempt, ?delay, error = %err, "Connection failed, reconnecting");
        self.inner.hooks.invoke_reconnect_attempt(attempt, delay);

        let wait = sleep(delay);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    if !apply_offline(&self.inner, command) {
                        return Flow::Stop;
                    }
                }
                _ = &mut wait => return Flow::Proceed,
            }
        }
    }

    async fn close_transport(&mut self) {
        let grace = self.inner.config.shutdown_grace;
        match timeout(grace, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "Transport close failed"),
            Err(_) => warn!(?grace, "Transport did not close in time, dropping it"),
        }
    }

    async fn finish(mut self, outcome: Result<(), FeedError>) -> Result<(), FeedError> {
        self.inner.closed.store(true, Ordering::Release);
        self.close_transport().await;
        self.inner
            .dispatcher
            .close(self.inner.config.shutdown_grace)
            .await;
        self.transition(ConnectionState::Closed);

        match &outcome {
            Ok(()) => info!("Client stopped"),
            Err(err) => error!(error = %err, "Client closed"),
        }
        outcome
    }
}

/// Apply a command to the registry without wire traffic. Returns false on
/// stop.
fn apply_offline(inner: &Inner, command: Option<Command>) -> bool {
    match command {
        None | Some(Command::Stop) => false,
        Some(Command::Subscribe(symbol)) => {
            if inner.registry.write().add(symbol.clone()) {
                debug!(%symbol, "Subscription queued");
            }
            true
        }
        Some(Command::Unsubscribe(symbol)) => {
            if inner.registry.write().remove(&symbol) {
                debug!(%symbol, "Subscription removed");
            }
            true
        }
    }
}
