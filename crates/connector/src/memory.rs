//! In-memory transport for tests and local replay.
//!
//! Every opened socket plays back a scripted list of frames, then idles until
//! more frames are pushed or the socket is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::traits::{CloseReason, ConnectRequest, Frame, Socket, SocketState, Transport};

type Script = VecDeque<Result<Frame, TransportError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Script>>,
    connect_failures: Mutex<VecDeque<TransportError>>,
    connect_delay: Mutex<Option<Duration>>,
    fail_sends: AtomicBool,
    sockets_opened: AtomicUsize,
    sockets_released: AtomicUsize,
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<CloseReason>>,
    requests: Mutex<Vec<ConnectRequest>>,
    live: Mutex<Vec<Arc<SocketInner>>>,
}

/// Scriptable [`Transport`]. Clones share state, so a test can keep one handle
/// while the client owns another.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `open` call.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *lock(&self.shared.connect_delay) = Some(delay);
        self
    }

    /// Frames played by the next socket that gets opened.
    pub fn script_socket(&self, frames: impl IntoIterator<Item = Frame>) {
        self.script_socket_results(frames.into_iter().map(Ok));
    }

    /// Like [`script_socket`](Self::script_socket), but receive errors can be
    /// injected at any position.
    pub fn script_socket_results(
        &self,
        items: impl IntoIterator<Item = Result<Frame, TransportError>>,
    ) {
        lock(&self.shared.scripts).push_back(items.into_iter().collect());
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        lock(&self.shared.connect_failures).push_back(error);
    }

    /// Make `send_text` and `close` fail on every socket.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Append a frame to the most recently opened socket.
    ///
    /// Returns false if no socket has been opened yet.
    pub fn push_frame(&self, frame: Frame) -> bool {
        match lock(&self.shared.live).last() {
            Some(socket) => {
                socket.push(Ok(frame));
                true
            }
            None => false,
        }
    }

    pub fn sockets_opened(&self) -> usize {
        self.shared.sockets_opened.load(Ordering::SeqCst)
    }

    /// Sockets dropped by their owner.
    pub fn sockets_released(&self) -> usize {
        self.shared.sockets_released.load(Ordering::SeqCst)
    }

    /// Text messages sent, in order, across all sockets.
    pub fn sent_messages(&self) -> Vec<String> {
        lock(&self.shared.sent).clone()
    }

    pub fn close_calls(&self) -> Vec<CloseReason> {
        lock(&self.shared.closes).clone()
    }

    /// Upgrade requests seen by `open`, failed attempts included.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        lock(&self.shared.requests).clone()
    }

    /// State of the most recently opened socket.
    pub fn last_socket_state(&self) -> Option<SocketState> {
        lock(&self.shared.live).last().map(|socket| socket.state())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    type Socket = InMemorySocket;

    async fn open(&self, request: &ConnectRequest) -> Result<InMemorySocket, TransportError> {
        lock(&self.shared.requests).push(request.clone());

        let delay = *lock(&self.shared.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.shared.connect_failures).pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let script = lock(&self.shared.scripts).pop_front().unwrap_or_default();
        let inner = Arc::new(SocketInner {
            frames: Mutex::new(script),
            notify: Notify::new(),
            state: AtomicU8::new(SocketState::Open as u8),
        });
        lock(&self.shared.live).push(Arc::clone(&inner));
        self.shared.sockets_opened.fetch_add(1, Ordering::SeqCst);

        Ok(InMemorySocket {
            inner,
            shared: Arc::clone(&self.shared),
        })
    }
}

struct SocketInner {
    frames: Mutex<Script>,
    notify: Notify,
    state: AtomicU8,
}

impl SocketInner {
    fn push(&self, item: Result<Frame, TransportError>) {
        lock(&self.frames).push_back(item);
        self.notify.notify_waiters();
    }

    fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn advance(&self, next: impl Fn(SocketState) -> SocketState) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(next(SocketState::from_u8(current)) as u8)
            });
    }
}

pub struct InMemorySocket {
    inner: Arc<SocketInner>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InMemorySocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySocket").finish_non_exhaustive()
    }
}

impl InMemorySocket {
    fn check_send(&self, error: impl FnOnce(String) -> TransportError) -> Result<(), TransportError> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(error("injected send failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Socket for InMemorySocket {
    async fn receive(&self) -> Result<Frame, TransportError> {
        loop {
            // Register before checking the queue so a concurrent push is not missed.
            let notified = self.inner.notify.notified();
            let next = lock(&self.inner.frames).pop_front();
            match next {
                Some(Ok(Frame::Close(reason))) => {
                    self.inner.advance(|state| match state {
                        SocketState::Open => SocketState::CloseReceived,
                        _ => SocketState::Closed,
                    });
                    return Ok(Frame::Close(reason));
                }
                Some(Err(e)) => {
                    self.inner.advance(|_| SocketState::Closed);
                    return Err(e);
                }
                Some(item) => return item,
                None => notified.await,
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.check_send(TransportError::Send)?;
        if self.state() != SocketState::Open {
            return Err(TransportError::Send("socket is not open".to_string()));
        }
        lock(&self.shared.sent).push(text.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        lock(&self.shared.closes).push(CloseReason {
            code,
            reason: reason.to_string(),
        });
        self.check_send(TransportError::Close)?;
        self.inner.advance(|state| match state {
            SocketState::Open => SocketState::CloseSent,
            _ => SocketState::Closed,
        });
        Ok(())
    }

    fn state(&self) -> SocketState {
        self.inner.state()
    }
}

impl Drop for InMemorySocket {
    fn drop(&mut self) {
        self.inner.advance(|_| SocketState::Closed);
        self.shared.sockets_released.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NORMAL_CLOSURE;
    use liqcap_metadata::ClientConfig;

    fn request() -> ConnectRequest {
        ConnectRequest::from_config(&ClientConfig::builder("ws://memory/test").build().unwrap())
    }

    #[tokio::test]
    async fn test_script_plays_in_order() {
        let transport = InMemoryTransport::new();
        transport.script_socket([Frame::text("a"), Frame::close(NORMAL_CLOSURE, "bye")]);

        let socket = transport.open(&request()).await.unwrap();
        assert_eq!(socket.receive().await.unwrap(), Frame::text("a"));
        assert_eq!(
            socket.receive().await.unwrap(),
            Frame::close(NORMAL_CLOSURE, "bye")
        );
        assert_eq!(socket.state(), SocketState::CloseReceived);

        socket.close(NORMAL_CLOSURE, "ack").await.unwrap();
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[tokio::test]
    async fn test_idle_socket_wakes_on_push() {
        let transport = InMemoryTransport::new();
        let socket = transport.open(&request()).await.unwrap();

        let pusher = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(pusher.push_frame(Frame::text("late")));
        });

        assert_eq!(socket.receive().await.unwrap(), Frame::text("late"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_consumed_once() {
        let transport = InMemoryTransport::new();
        transport.fail_next_connect(TransportError::Connect("refused".to_string()));

        assert!(transport.open(&request()).await.is_err());
        assert!(transport.open(&request()).await.is_ok());
        assert_eq!(transport.sockets_opened(), 1);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_releases_socket() {
        let transport = InMemoryTransport::new();
        let socket = transport.open(&request()).await.unwrap();
        drop(socket);

        assert_eq!(transport.sockets_released(), 1);
        assert_eq!(transport.last_socket_state(), Some(SocketState::Closed));
    }
}
