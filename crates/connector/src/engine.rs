//! Streaming engine: turns socket frames into liquidation events.

use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::controller::{ConnectionController, CLOSE_TIMEOUT};
use crate::error::{ClientError, TransportError};
use crate::event::LiquidationEvent;
use crate::traits::{CloseReason, Frame, Socket, Transport, NORMAL_CLOSURE};

/// Reason sent when answering a server-initiated close.
pub const CLOSE_ACK_REASON: &str = "Closing as requested by server.";

/// Result of feeding one text fragment to a [`MessageAssembler`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Assembled {
    /// More fragments are expected.
    Partial,
    /// The message was empty or whitespace-only.
    Blank,
    Message {
        text: String,
        fragments: usize,
        lossy: bool,
    },
}

/// Accumulates text fragments until the final one arrives.
pub(crate) struct MessageAssembler {
    buffer: Vec<u8>,
    fragments: usize,
}

impl MessageAssembler {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            fragments: 0,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8], fin: bool) -> Assembled {
        self.buffer.extend_from_slice(data);
        self.fragments += 1;
        if !fin {
            return Assembled::Partial;
        }

        let fragments = std::mem::take(&mut self.fragments);
        let (text, lossy) = match String::from_utf8_lossy(&self.buffer) {
            Cow::Borrowed(text) => (text.to_owned(), false),
            Cow::Owned(text) => (text, true),
        };
        self.buffer.clear();

        if text.trim().is_empty() {
            return Assembled::Blank;
        }
        Assembled::Message {
            text,
            fragments,
            lossy,
        }
    }

    /// Bytes of an unfinished message.
    pub(crate) fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether some fragments of a message arrived but not the final one.
    pub(crate) fn in_progress(&self) -> bool {
        self.fragments > 0
    }
}

/// Clears the client's streaming flag when dropped.
pub(crate) struct StreamingGuard(Arc<AtomicBool>);

impl StreamingGuard {
    /// Claim the flag, or `None` if another stream holds it.
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for StreamingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Asynchronous sequence of [`LiquidationEvent`]s.
///
/// Nothing happens until the first poll. The sequence ends cleanly on
/// cancellation, on a server close or when the client is disposed. A transport
/// failure is yielded once as [`ClientError::StreamTerminated`] and then the
/// sequence ends. Dropping the stream releases the client for another
/// `stream_events` call.
pub struct LiquidationStream {
    exchange: String,
    inner: BoxStream<'static, Result<LiquidationEvent, ClientError>>,
}

impl Stream for LiquidationStream {
    type Item = Result<LiquidationEvent, ClientError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for LiquidationStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiquidationStream")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

enum Wake {
    Cancelled,
    Disposed,
    Received(Result<Frame, TransportError>),
}

pub(crate) struct StreamEngine<T: Transport> {
    controller: Arc<ConnectionController<T>>,
    cancel: CancellationToken,
    socket: Option<Arc<T::Socket>>,
    assembler: MessageAssembler,
    /// `None` once the stream has finished
    guard: Option<StreamingGuard>,
}

impl<T: Transport> StreamEngine<T> {
    pub(crate) fn new(
        controller: Arc<ConnectionController<T>>,
        cancel: CancellationToken,
        guard: StreamingGuard,
    ) -> Self {
        let assembler = MessageAssembler::with_capacity(controller.config().receive_buffer_size());
        Self {
            controller,
            cancel,
            socket: None,
            assembler,
            guard: Some(guard),
        }
    }

    pub(crate) fn into_stream(self) -> LiquidationStream {
        let exchange = self.controller.exchange().to_string();
        let inner = stream::unfold(self, |mut engine| async move {
            let item = engine.next_event().await?;
            Some((item, engine))
        });
        LiquidationStream {
            exchange,
            inner: inner.boxed(),
        }
    }

    async fn next_event(&mut self) -> Option<Result<LiquidationEvent, ClientError>> {
        self.guard.as_ref()?;

        let socket = match &self.socket {
            Some(socket) => Arc::clone(socket),
            None => match self.controller.connect(&self.cancel).await {
                Ok(socket) => {
                    self.socket = Some(Arc::clone(&socket));
                    socket
                }
                Err(ClientError::Cancelled) => return self.finish("cancelled"),
                Err(ClientError::Disposed) => return self.finish("disposed"),
                Err(e) => return self.fail("connect_failed", e),
            },
        };

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                _ = self.controller.disposal().cancelled() => Wake::Disposed,
                received = socket.receive() => Wake::Received(received),
            };

            let frame = match wake {
                Wake::Cancelled => return self.finish("cancelled"),
                Wake::Disposed => return self.finish("disposed"),
                Wake::Received(Ok(frame)) => frame,
                Wake::Received(Err(e)) => {
                    self.controller.connection_lost(&socket, "transport_error");
                    return self.fail("transport_error", ClientError::StreamTerminated(e));
                }
            };
            self.controller.metrics().frame(frame.kind());

            match frame {
                Frame::Text { data, fin } => {
                    if let Some(event) = self.on_text(&data, fin) {
                        return Some(Ok(event));
                    }
                }
                Frame::Close(reason) => {
                    self.controller.connection_lost(&socket, "server_closed");
                    self.acknowledge_close(&*socket, reason).await;
                    return self.finish("server_closed");
                }
                other => {
                    debug!(
                        exchange = %self.controller.exchange(),
                        kind = other.kind(),
                        "Ignoring non-text frame"
                    );
                }
            }
        }
    }

    fn on_text(&mut self, data: &[u8], fin: bool) -> Option<LiquidationEvent> {
        let exchange = self.controller.exchange();
        let metrics = self.controller.metrics();

        match self.assembler.push(data, fin) {
            Assembled::Partial => {
                trace!(exchange = %exchange, buffered = self.assembler.pending_len(), "Buffered fragment");
                None
            }
            Assembled::Blank => {
                metrics.discarded_message();
                trace!(exchange = %exchange, "Discarded blank message");
                None
            }
            Assembled::Message {
                text,
                fragments,
                lossy,
            } => {
                if lossy {
                    warn!(exchange = %exchange, "Replaced invalid UTF-8 in message");
                }
                if fragments > 1 {
                    metrics.fragmented_message();
                }
                metrics.event();
                trace!(exchange = %exchange, len = text.len(), fragments, "Liquidation message");
                Some(LiquidationEvent::new(exchange, text))
            }
        }
    }

    async fn acknowledge_close(&self, socket: &T::Socket, reason: Option<CloseReason>) {
        let exchange = self.controller.exchange();
        match &reason {
            Some(reason) => warn!(
                exchange = %exchange,
                code = reason.code,
                reason = %reason.reason,
                "Server closed WebSocket connection"
            ),
            None => warn!(exchange = %exchange, "Server closed WebSocket connection without status"),
        }

        if !socket.state().can_close() {
            return;
        }
        let ack = socket.close(NORMAL_CLOSURE, CLOSE_ACK_REASON);
        match tokio::time::timeout(CLOSE_TIMEOUT, ack).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(exchange = %exchange, error = %e, "Failed to acknowledge close"),
            Err(_) => debug!(exchange = %exchange, "Timed out acknowledging close"),
        }
    }

    fn finish(&mut self, reason: &str) -> Option<Result<LiquidationEvent, ClientError>> {
        self.release(reason);
        debug!(exchange = %self.controller.exchange(), reason, "Event stream ended");
        None
    }

    fn fail(
        &mut self,
        reason: &str,
        error: ClientError,
    ) -> Option<Result<LiquidationEvent, ClientError>> {
        self.release(reason);
        warn!(exchange = %self.controller.exchange(), error = %error, "Event stream failed");
        Some(Err(error))
    }

    fn release(&mut self, reason: &str) {
        self.guard.take();
        self.drop_socket();
        self.controller.metrics().terminated(reason);
    }

    /// Let go of the socket. One left in the middle of a message cannot be
    /// reused, since the next stream would start from the tail fragments.
    fn drop_socket(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        if self.assembler.in_progress() {
            debug!(
                exchange = %self.controller.exchange(),
                buffered = self.assembler.pending_len(),
                "Stream ended inside a fragmented message"
            );
            self.controller.connection_lost(&socket, "partial_message");
        }
    }
}

impl<T: Transport> Drop for StreamEngine<T> {
    fn drop(&mut self) {
        self.drop_socket();
    }
}
