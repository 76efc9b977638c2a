//! Connection controller
//!
//! Owns the physical socket and its lifecycle. Connect attempts are serialized
//! by an async lock; the connection state itself is an atomic so readers (the
//! streaming engine, health checks) never wait on that lock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ConnectionError};
use crate::metrics::ExchangeMetrics;
use crate::traits::{ConnectHook, ConnectRequest, Socket, SocketState, Transport, NORMAL_CLOSURE};
use liqcap_metadata::ClientConfig;

/// Upper bound on a graceful close handshake.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
    Disposed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Disposed,
        }
    }

    fn is_disposed(&self) -> bool {
        matches!(self, ConnectionState::Closing | ConnectionState::Disposed)
    }
}

pub(crate) struct ConnectionController<T: Transport> {
    exchange: String,
    config: ClientConfig,
    transport: T,
    hook: Arc<dyn ConnectHook>,
    /// Held for the whole connect attempt, handshake included
    connect_lock: tokio::sync::Mutex<()>,
    state: AtomicU8,
    /// Live socket; only populated while `state` is `Connected`
    socket: Mutex<Option<Arc<T::Socket>>>,
    disposed: CancellationToken,
    metrics: ExchangeMetrics,
}

impl<T: Transport> ConnectionController<T> {
    pub(crate) fn new(
        exchange: String,
        config: ClientConfig,
        transport: T,
        hook: Arc<dyn ConnectHook>,
        metrics: ExchangeMetrics,
    ) -> Self {
        Self {
            exchange,
            config,
            transport,
            hook,
            connect_lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            socket: Mutex::new(None),
            disposed: CancellationToken::new(),
            metrics,
        }
    }

    pub(crate) fn exchange(&self) -> &str {
        &self.exchange
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &ExchangeMetrics {
        &self.metrics
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Cancelled once `dispose` starts.
    pub(crate) fn disposal(&self) -> &CancellationToken {
        &self.disposed
    }

    pub(crate) fn ensure_not_disposed(&self) -> Result<(), ClientError> {
        if self.state().is_disposed() {
            return Err(ClientError::Disposed);
        }
        Ok(())
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<T::Socket>>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn healthy_socket(&self) -> Option<Arc<T::Socket>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.slot()
            .as_ref()
            .filter(|socket| socket.state() == SocketState::Open)
            .cloned()
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Return the connected socket, opening a new one if needed.
    ///
    /// A healthy connection is reused without a second handshake. On any
    /// failure, including cancellation, the partial socket is dropped and the
    /// state returns to `Disconnected`.
    pub(crate) async fn connect(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<T::Socket>, ClientError> {
        self.ensure_not_disposed()?;
        if let Some(socket) = self.healthy_socket() {
            return Ok(socket);
        }

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = self.disposed.cancelled() => return Err(ClientError::Disposed),
            guard = self.connect_lock.lock() => guard,
        };

        // Another caller may have connected while we waited for the lock.
        self.ensure_not_disposed()?;
        if let Some(socket) = self.healthy_socket() {
            return Ok(socket);
        }

        let previous = self.state();
        if !self.transition(previous, ConnectionState::Connecting) {
            return Err(ClientError::Disposed);
        }

        let stale = self.slot().take();
        if let Some(stale) = stale {
            debug!(exchange = %self.exchange, state = ?stale.state(), "Discarding stale socket");
        }
        self.metrics.set_connected(false);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            _ = self.disposed.cancelled() => Err(ClientError::Disposed),
            result = self.establish() => result.map_err(ClientError::from),
        };

        match outcome {
            Ok(socket) => self.publish(socket),
            Err(e) => {
                self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                match &e {
                    ClientError::Cancelled => {
                        self.metrics.connect_outcome("cancelled");
                        debug!(exchange = %self.exchange, "Connect cancelled");
                    }
                    _ => {
                        self.metrics.connect_outcome("failure");
                        warn!(exchange = %self.exchange, error = %e, "Connect failed");
                    }
                }
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<T::Socket, ConnectionError> {
        let mut request = ConnectRequest::from_config(&self.config);
        self.hook.configure_request(&mut request);

        info!(
            exchange = %self.exchange,
            endpoint = %request.endpoint,
            "Connecting to liquidation stream"
        );
        let socket = self
            .transport
            .open(&request)
            .await
            .map_err(ConnectionError::Transport)?;

        self.hook.on_connected(&socket).await?;

        if let Some(message) = self.config.handshake_message() {
            socket
                .send_text(message)
                .await
                .map_err(ConnectionError::Handshake)?;
            debug!(exchange = %self.exchange, message = %message, "Sent subscription message");
        }

        Ok(socket)
    }

    fn publish(&self, socket: T::Socket) -> Result<Arc<T::Socket>, ClientError> {
        let socket = Arc::new(socket);
        *self.slot() = Some(Arc::clone(&socket));

        if !self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            // dispose() started while we were connecting and owns teardown now
            self.slot().take();
            return Err(ClientError::Disposed);
        }

        self.metrics.connect_outcome("success");
        self.metrics.set_connected(true);
        info!(exchange = %self.exchange, "Connected to liquidation stream");
        Ok(socket)
    }

    /// Forget `socket` so the next `connect` opens a new one.
    ///
    /// No-op if the slot already holds a different socket or dispose has
    /// started.
    pub(crate) fn connection_lost(&self, socket: &Arc<T::Socket>, reason: &str) {
        let lost = {
            let mut slot = self.slot();
            let current = slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, socket));
            if !current
                || !self.transition(ConnectionState::Connected, ConnectionState::Disconnected)
            {
                return;
            }
            slot.take()
        };
        drop(lost);

        self.metrics.set_connected(false);
        info!(exchange = %self.exchange, reason, "Liquidation stream connection lost");
    }

    /// Release the socket and refuse further work. Only the first call has effect.
    pub(crate) async fn dispose(&self) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if ConnectionState::from_u8(current).is_disposed() {
                return;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.disposed.cancel();

        let socket = self.slot().take();
        if let Some(socket) = socket {
            if socket.state().can_close() {
                let close = socket.close(NORMAL_CLOSURE, "Disposing client");
                match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
                    Ok(Ok(())) => debug!(exchange = %self.exchange, "WebSocket closed"),
                    Ok(Err(e)) => debug!(
                        exchange = %self.exchange,
                        error = %e,
                        "Failed to close WebSocket connection gracefully"
                    ),
                    Err(_) => debug!(
                        exchange = %self.exchange,
                        timeout_secs = CLOSE_TIMEOUT.as_secs(),
                        "Timed out closing WebSocket connection"
                    ),
                }
            }
        }

        self.metrics.set_connected(false);
        self.state
            .store(ConnectionState::Disposed as u8, Ordering::SeqCst);
        info!(exchange = %self.exchange, "Client disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HookError, TransportError};
    use crate::memory::InMemoryTransport;
    use crate::metrics::StreamMetrics;
    use crate::traits::NoopHook;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn controller_with(
        transport: InMemoryTransport,
        handshake: Option<&str>,
        hook: Arc<dyn ConnectHook>,
    ) -> ConnectionController<InMemoryTransport> {
        let mut builder = ClientConfig::builder("wss://x/y");
        if let Some(message) = handshake {
            builder = builder.handshake_message(message);
        }
        ConnectionController::new(
            "Test".to_string(),
            builder.build().unwrap(),
            transport,
            hook,
            StreamMetrics::default().for_exchange("Test"),
        )
    }

    fn controller(transport: InMemoryTransport, handshake: Option<&str>) -> ConnectionController<InMemoryTransport> {
        controller_with(transport, handshake, Arc::new(NoopHook))
    }

    #[tokio::test]
    async fn test_connect_sends_handshake_once() {
        let transport = InMemoryTransport::new();
        let controller = controller(transport.clone(), Some(r#"{"op":"sub"}"#));
        let cancel = CancellationToken::new();

        controller.connect(&cancel).await.unwrap();
        controller.connect(&cancel).await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(transport.sockets_opened(), 1);
        assert_eq!(transport.sent_messages(), vec![r#"{"op":"sub"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_transport_failure_reverts_to_disconnected() {
        let transport = InMemoryTransport::new();
        transport.fail_next_connect(TransportError::Connect("refused".to_string()));
        let controller = controller(transport.clone(), None);

        let err = controller.connect(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Connection(ConnectionError::Transport(TransportError::Connect(
                "refused".to_string()
            )))
        );
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        // The failure is not sticky.
        controller.connect(&CancellationToken::new()).await.unwrap();
        assert_eq!(controller.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_handshake_failure_releases_socket() {
        let transport = InMemoryTransport::new();
        transport.fail_sends(true);
        let controller = controller(transport.clone(), Some("subscribe"));

        let err = controller.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connection(ConnectionError::Handshake(_))
        ));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(transport.sockets_opened(), 1);
        assert_eq!(transport.sockets_released(), 1);
    }

    struct RejectingHook;

    #[async_trait]
    impl ConnectHook for RejectingHook {
        fn configure_request(&self, request: &mut ConnectRequest) {
            request.set_header("X-Venue", "test");
        }

        async fn on_connected(&self, _socket: &dyn Socket) -> Result<(), HookError> {
            Err(HookError("auth rejected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_hook_failure_is_connection_error() {
        let transport = InMemoryTransport::new();
        let controller = controller_with(transport.clone(), Some("subscribe"), Arc::new(RejectingHook));

        let err = controller.connect(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Connection(ConnectionError::Hook(HookError("auth rejected".to_string())))
        );
        // Handshake never sent after a failed hook.
        assert!(transport.sent_messages().is_empty());
        assert_eq!(transport.sockets_released(), 1);
        assert_eq!(transport.requests()[0].header("x-venue"), Some("test"));
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl ConnectHook for CountingHook {
        async fn on_connected(&self, socket: &dyn Socket) -> Result<(), HookError> {
            assert_eq!(socket.state(), SocketState::Open);
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reconnect_discards_closed_socket() {
        let transport = InMemoryTransport::new();
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let controller = controller_with(transport.clone(), Some("subscribe"), hook.clone());
        let cancel = CancellationToken::new();

        let first = controller.connect(&cancel).await.unwrap();
        first.close(NORMAL_CLOSURE, "going away").await.unwrap();
        drop(first);

        controller.connect(&cancel).await.unwrap();

        assert_eq!(transport.sockets_opened(), 2);
        assert_eq!(transport.sockets_released(), 1);
        assert_eq!(transport.sent_messages().len(), 2);
        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_lost_only_for_current_socket() {
        let transport = InMemoryTransport::new();
        let controller = controller(transport.clone(), None);
        let cancel = CancellationToken::new();

        let first = controller.connect(&cancel).await.unwrap();
        controller.connection_lost(&first, "server_closed");
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(!controller.metrics().is_connected());

        let second = controller.connect(&cancel).await.unwrap();
        assert!(controller.metrics().is_connected());

        // A late report about the old socket leaves the new one alone.
        controller.connection_lost(&first, "transport_error");
        assert_eq!(controller.state(), ConnectionState::Connected);
        assert!(Arc::ptr_eq(&controller.connect(&cancel).await.unwrap(), &second));
        assert_eq!(transport.sockets_opened(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_connect_leaves_disconnected() {
        let transport = InMemoryTransport::new().with_connect_delay(Duration::from_secs(60));
        let controller = controller(transport.clone(), None);
        let cancel = CancellationToken::new();

        let connect = controller.connect(&cancel);
        tokio::pin!(connect);
        tokio::select! {
            _ = &mut connect => panic!("connect should still be pending"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert_eq!(controller.state(), ConnectionState::Connecting);

        cancel.cancel();
        assert_eq!(connect.await.unwrap_err(), ClientError::Cancelled);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let transport = InMemoryTransport::new();
        let controller = controller(transport.clone(), None);
        controller.connect(&CancellationToken::new()).await.unwrap();

        controller.dispose().await;
        controller.dispose().await;

        assert_eq!(controller.state(), ConnectionState::Disposed);
        assert_eq!(transport.close_calls().len(), 1);
        assert_eq!(transport.close_calls()[0].reason, "Disposing client");
        assert_eq!(transport.sockets_released(), 1);
        assert_eq!(
            controller.connect(&CancellationToken::new()).await.unwrap_err(),
            ClientError::Disposed
        );
    }

    #[tokio::test]
    async fn test_dispose_without_connection() {
        let transport = InMemoryTransport::new();
        let controller = controller(transport.clone(), None);

        controller.dispose().await;

        assert_eq!(controller.state(), ConnectionState::Disposed);
        assert!(transport.close_calls().is_empty());
        assert!(controller.disposal().is_cancelled());
    }

    #[tokio::test]
    async fn test_dispose_swallows_close_failure() {
        let transport = InMemoryTransport::new();
        let controller = controller(transport.clone(), None);
        controller.connect(&CancellationToken::new()).await.unwrap();
        transport.fail_sends(true);

        controller.dispose().await;

        assert_eq!(controller.state(), ConnectionState::Disposed);
        assert_eq!(transport.sockets_released(), 1);
    }
}
