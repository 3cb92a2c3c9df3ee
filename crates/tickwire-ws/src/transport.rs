//! WebSocket transport abstraction
//!
//! The connection state machine owns one [`Transport`] and drives it from a
//! single task. Swapping in [`MockTransport`] lets the whole lifecycle run in
//! unit tests without network access.
//!
//! # Example
//!
//! ```no_run
//! use tickwire_ws::transport::{Transport, WsTransport};
//! use tickwire_types::TransportError;
//!
//! async fn example() -> Result<(), TransportError> {
//!     let mut transport = WsTransport::new();
//!     transport.connect("wss://ws.finnhub.io").await?;
//!     transport.send(r#"{"type":"subscribe","symbol":"AAPL"}"#).await?;
//!     if let Some(frame) = transport.recv().await? {
//!         println!("Received: {}", frame);
//!     }
//!     transport.close().await
//! }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tickwire_types::TransportError;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

/// Trait for WebSocket transport abstraction
///
/// `recv` must be cancel safe: the state machine races it against commands
/// and timers and drops it when another branch wins.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the WebSocket endpoint, replacing any previous connection
    async fn connect(&mut self, url: &str) -> Result<(), TransportError>;

    /// Send a text frame
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive a text frame
    ///
    /// Returns `None` if the connection was closed by the remote end.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// URL of the current or last connection
    fn endpoint(&self) -> Option<&str>;
}

/// Real WebSocket transport using tokio-tungstenite
pub struct WsTransport {
    url: Option<String>,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    connect_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    /// Create a new, unconnected WebSocket transport
    pub fn new() -> Self {
        Self {
            url: None,
            stream: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    #[instrument(skip(self))]
    async fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        debug!("Connecting to WebSocket");
        self.stream = None;
        self.url = Some(url.to_string());

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        self.stream = Some(ws_stream);
        debug!("WebSocket connected");
        Ok(())
    }

    #[instrument(skip(self, message), fields(len = message.len()))]
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        stream
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                Some(Ok(Message::Close(_))) => {
                    self.stream = None;
                    return Ok(None);
                }
                // Pongs are queued by tungstenite and flushed on the next write
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    self.stream = None;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .close(None)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockHandle, MockTransport};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    enum Inbound {
        Frame(String),
        Close,
        Error(TransportError),
    }

    #[derive(Default)]
    struct Shared {
        inbound: Mutex<VecDeque<Inbound>>,
        inbound_ready: Notify,
        sent: Mutex<Vec<String>>,
        connect_failures: Mutex<VecDeque<TransportError>>,
        hang_connect: AtomicBool,
        stall_sends_after: Mutex<Option<usize>>,
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    /// Mock transport for testing
    ///
    /// Inbound frames are scripted through a [`MockHandle`] and survive
    /// reconnects, so a test can lay out several sessions up front.
    pub struct MockTransport {
        shared: Arc<Shared>,
        url: Option<String>,
        connected: bool,
        /// Simulate send failure
        pub fail_send: bool,
    }

    /// Test-side handle for scripting a [`MockTransport`]
    #[derive(Clone)]
    pub struct MockHandle {
        shared: Arc<Shared>,
    }

    impl MockTransport {
        /// Create a mock transport and its scripting handle
        pub fn new() -> (Self, MockHandle) {
            let shared = Arc::new(Shared::default());
            let transport = Self {
                shared: shared.clone(),
                url: None,
                connected: false,
                fail_send: false,
            };
            (transport, MockHandle { shared })
        }
    }

    impl MockHandle {
        fn push(&self, item: Inbound) {
            self.shared.inbound.lock().push_back(item);
            self.shared.inbound_ready.notify_one();
        }

        /// Queue an inbound frame
        pub fn push_frame(&self, frame: impl Into<String>) {
            self.push(Inbound::Frame(frame.into()));
        }

        /// Queue several inbound frames
        pub fn push_frames(&self, frames: impl IntoIterator<Item = impl Into<String>>) {
            for frame in frames {
                self.push_frame(frame);
            }
        }

        /// Queue a remote close
        pub fn push_close(&self) {
            self.push(Inbound::Close);
        }

        /// Queue a receive error
        pub fn push_error(&self, error: TransportError) {
            self.push(Inbound::Error(error));
        }

        /// Make the next `n` connect attempts fail
        pub fn fail_next_connects(&self, n: usize) {
            let mut failures = self.shared.connect_failures.lock();
            for _ in 0..n {
                failures.push_back(TransportError::ConnectionFailed(
                    "mock connection failure".into(),
                ));
            }
        }

        /// Make connect attempts never complete
        pub fn hang_connects(&self, hang: bool) {
            self.shared.hang_connect.store(hang, Ordering::SeqCst);
        }

        /// Make every send after the first `n` frames never complete
        pub fn stall_sends_after(&self, n: usize) {
            *self.shared.stall_sends_after.lock() = Some(n);
        }

        /// Frames sent so far
        pub fn sent(&self) -> Vec<String> {
            self.shared.sent.lock().clone()
        }

        /// Take the frames sent so far
        pub fn take_sent(&self) -> Vec<String> {
            std::mem::take(&mut *self.shared.sent.lock())
        }

        /// Number of connect attempts (including failed ones)
        pub fn connect_count(&self) -> usize {
            self.shared.connects.load(Ordering::SeqCst)
        }

        /// Number of close calls
        pub fn close_count(&self) -> usize {
            self.shared.closes.load(Ordering::SeqCst)
        }

        /// Wait until at least `n` frames have been sent
        pub async fn wait_for_sent(&self, n: usize, within: Duration) -> Vec<String> {
            let waited = timeout(within, async {
                loop {
                    let sent = self.sent();
                    if sent.len() >= n {
                        return sent;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await;

            waited.unwrap_or_else(|_| self.sent())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            self.url = Some(url.to_string());
            self.connected = false;

            if self.shared.hang_connect.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }

            if let Some(err) = self.shared.connect_failures.lock().pop_front() {
                return Err(err);
            }

            self.connected = true;
            Ok(())
        }

        async fn send(&mut self, message: &str) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            if self.fail_send {
                return Err(TransportError::SendFailed("mock send failure".into()));
            }

            let stall_after = *self.shared.stall_sends_after.lock();
            if stall_after.is_some_and(|n| self.shared.sent.lock().len() >= n) {
                std::future::pending::<()>().await;
            }

            self.shared.sent.lock().push(message.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }

            loop {
                let next = self.shared.inbound.lock().pop_front();
                match next {
                    Some(Inbound::Frame(frame)) => return Ok(Some(frame)),
                    Some(Inbound::Close) => {
                        self.connected = false;
                        return Ok(None);
                    }
                    Some(Inbound::Error(err)) => {
                        self.connected = false;
                        return Err(err);
                    }
                    None => self.shared.inbound_ready.notified().await,
                }
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn endpoint(&self) -> Option<&str> {
            self.url.as_deref()
        }
    }
}
