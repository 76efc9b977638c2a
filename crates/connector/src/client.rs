use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::controller::{ConnectionController, ConnectionState};
use crate::engine::{LiquidationStream, StreamEngine, StreamingGuard};
use crate::error::ClientError;
use crate::metrics::StreamMetrics;
use crate::traits::{ConnectHook, NoopHook, Transport};
use crate::websocket::TungsteniteTransport;
use liqcap_metadata::ClientConfig;

/// Streaming client for one exchange's liquidation feed.
///
/// Connection setup is serialized: concurrent callers of [`connect`](Self::connect)
/// share a single socket and a single handshake. At most one
/// [`LiquidationStream`] may be active at a time.
pub struct LiquidationStreamClient<T: Transport = TungsteniteTransport> {
    controller: Arc<ConnectionController<T>>,
    streaming: Arc<AtomicBool>,
}

impl LiquidationStreamClient<TungsteniteTransport> {
    /// Client over a real WebSocket connection with no venue hooks.
    pub fn connect_to(exchange_id: impl Into<String>, config: ClientConfig) -> Self {
        ClientBuilder::new(exchange_id, config).build(TungsteniteTransport)
    }

    pub fn builder(exchange_id: impl Into<String>, config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(exchange_id, config)
    }
}

impl<T: Transport> LiquidationStreamClient<T> {
    pub fn new(exchange_id: impl Into<String>, config: ClientConfig, transport: T) -> Self {
        ClientBuilder::new(exchange_id, config).build(transport)
    }

    /// Identifier stamped on every event from this client.
    pub fn exchange_id(&self) -> &str {
        self.controller.exchange()
    }

    pub fn config(&self) -> &ClientConfig {
        self.controller.config()
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Ensure a live connection, opening one and sending the handshake if needed.
    ///
    /// Returns immediately when already connected.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.controller.connect(cancel).await.map(|_| ())
    }

    /// Start streaming events.
    ///
    /// Fails immediately with [`ClientError::Disposed`] or
    /// [`ClientError::AlreadyStreaming`]; otherwise the returned stream connects
    /// lazily on its first poll.
    pub fn stream_events(&self, cancel: CancellationToken) -> Result<LiquidationStream, ClientError> {
        self.controller.ensure_not_disposed()?;
        let guard = StreamingGuard::acquire(&self.streaming).ok_or(ClientError::AlreadyStreaming)?;
        Ok(StreamEngine::new(Arc::clone(&self.controller), cancel, guard).into_stream())
    }

    /// Close the connection and release resources. Safe to call more than once.
    ///
    /// The socket is closed before this returns. A stream that is not being
    /// polled keeps its handle to the closed socket until it is polled again,
    /// at which point it ends, or until it is dropped.
    pub async fn dispose(&self) {
        self.controller.dispose().await;
    }
}

impl<T: Transport> fmt::Debug for LiquidationStreamClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiquidationStreamClient")
            .field("exchange_id", &self.exchange_id())
            .field("state", &self.state())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

/// Builder for [`LiquidationStreamClient`].
pub struct ClientBuilder {
    exchange_id: String,
    config: ClientConfig,
    hook: Arc<dyn ConnectHook>,
    metrics: Option<StreamMetrics>,
}

impl ClientBuilder {
    pub fn new(exchange_id: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            config,
            hook: Arc::new(NoopHook),
            metrics: None,
        }
    }

    pub fn hook(mut self, hook: impl ConnectHook) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    pub fn shared_hook(mut self, hook: Arc<dyn ConnectHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Record metrics on these families instead of an unregistered set.
    pub fn metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build<T: Transport>(self, transport: T) -> LiquidationStreamClient<T> {
        let metrics = self
            .metrics
            .unwrap_or_default()
            .for_exchange(self.exchange_id.clone());
        LiquidationStreamClient {
            controller: Arc::new(ConnectionController::new(
                self.exchange_id,
                self.config,
                transport,
                self.hook,
                metrics,
            )),
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }
}
