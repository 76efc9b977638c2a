//! WebSocket transport over tokio-tungstenite.
//!
//! tungstenite reassembles fragmented messages itself, so the socket re-emits
//! each message as chunks of at most `receive_buffer_size` bytes with `fin`
//! set on the last chunk. Keep-alive pings are sent from `receive` on their
//! own timer.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::traits::{CloseReason, ConnectRequest, Frame, Socket, SocketState, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Opens real WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    type Socket = TungsteniteSocket;

    async fn open(&self, request: &ConnectRequest) -> Result<TungsteniteSocket, TransportError> {
        let upgrade = upgrade_request(request)?;
        let config = WebSocketConfig {
            max_message_size: Some(MAX_MESSAGE_SIZE),
            ..Default::default()
        };

        let (ws, response) = connect_async_with_config(upgrade, Some(config), false)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(endpoint = %request.endpoint, status = %response.status(), "WebSocket upgrade complete");

        Ok(TungsteniteSocket::new(
            ws,
            request.receive_buffer_size,
            request.keep_alive,
        ))
    }
}

fn upgrade_request(request: &ConnectRequest) -> Result<Request, TransportError> {
    let mut upgrade = request
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    for (name, value) in &request.headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Connect(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Connect(format!("invalid value for header {name}: {e}")))?;
        upgrade.headers_mut().insert(header, value);
    }
    Ok(upgrade)
}

/// A message not yet fully handed out as chunks.
struct PendingMessage {
    text: bool,
    data: Bytes,
}

/// Take the next chunk of the pending message, clearing it after the last one.
fn next_chunk(pending: &mut Option<PendingMessage>, max_len: usize) -> Option<Frame> {
    let message = pending.as_mut()?;
    let len = message.data.len().min(max_len);
    let data = message.data.split_to(len);
    let fin = message.data.is_empty();
    let text = message.text;
    if fin {
        *pending = None;
    }
    Some(if text {
        Frame::Text { data, fin }
    } else {
        Frame::Binary { data, fin }
    })
}

struct Reader {
    stream: SplitStream<WsStream>,
    pending: Option<PendingMessage>,
    keep_alive: Option<Interval>,
}

enum Wake {
    KeepAlive,
    Message(Option<Result<Message, tungstenite::Error>>),
}

pub struct TungsteniteSocket {
    sink: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Reader>,
    state: AtomicU8,
    receive_buffer_size: usize,
}

impl TungsteniteSocket {
    fn new(ws: WsStream, receive_buffer_size: usize, keep_alive: Duration) -> Self {
        let (sink, stream) = ws.split();
        let keep_alive = (!keep_alive.is_zero()).then(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        Self {
            sink: Mutex::new(sink),
            reader: Mutex::new(Reader {
                stream,
                pending: None,
                keep_alive,
            }),
            state: AtomicU8::new(SocketState::Open as u8),
            receive_buffer_size,
        }
    }

    async fn send(&self, message: Message) -> Result<(), tungstenite::Error> {
        self.sink.lock().await.send(message).await
    }

    fn advance(&self, next: impl Fn(SocketState) -> SocketState) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(next(SocketState::from_u8(current)) as u8)
            });
    }
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn receive(&self) -> Result<Frame, TransportError> {
        let mut reader = self.reader.lock().await;
        let Reader {
            stream,
            pending,
            keep_alive,
        } = &mut *reader;

        loop {
            if let Some(frame) = next_chunk(pending, self.receive_buffer_size) {
                return Ok(frame);
            }

            let wake = match keep_alive.as_mut() {
                Some(interval) => tokio::select! {
                    _ = interval.tick() => Wake::KeepAlive,
                    message = stream.next() => Wake::Message(message),
                },
                None => Wake::Message(stream.next().await),
            };

            let message = match wake {
                Wake::KeepAlive => {
                    self.send(Message::Ping(Vec::new())).await.map_err(|e| {
                        TransportError::Receive(format!("keep-alive ping failed: {e}"))
                    })?;
                    trace!("Sent keep-alive ping");
                    continue;
                }
                Wake::Message(None) => {
                    self.advance(|_| SocketState::Closed);
                    return Err(TransportError::ConnectionClosed);
                }
                Wake::Message(Some(Err(e))) => {
                    self.advance(|_| SocketState::Closed);
                    return Err(match e {
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                            TransportError::ConnectionClosed
                        }
                        other => TransportError::Receive(other.to_string()),
                    });
                }
                Wake::Message(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    *pending = Some(PendingMessage {
                        text: true,
                        data: Bytes::from(text),
                    });
                }
                Message::Binary(data) => {
                    *pending = Some(PendingMessage {
                        text: false,
                        data: Bytes::from(data),
                    });
                }
                // tungstenite has already queued the pong; the next read or
                // write flushes it.
                Message::Ping(data) => return Ok(Frame::Ping(Bytes::from(data))),
                Message::Pong(data) => return Ok(Frame::Pong(Bytes::from(data))),
                Message::Close(frame) => {
                    self.advance(|state| match state {
                        SocketState::Open => SocketState::CloseReceived,
                        _ => SocketState::Closed,
                    });
                    return Ok(Frame::Close(frame.map(|f| CloseReason {
                        code: u16::from(f.code),
                        reason: f.reason.into_owned(),
                    })));
                }
                // Raw frames are never yielded when reading.
                Message::Frame(_) => continue,
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let result = if self.state() == SocketState::CloseReceived {
            // tungstenite queues the close reply when it reads the peer's
            // close frame; it only has to be flushed.
            sink.flush().await
        } else {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Owned(reason.to_string()),
            };
            sink.send(Message::Close(Some(frame))).await
        };
        drop(sink);
        self.advance(|state| match state {
            SocketState::Open => SocketState::CloseSent,
            _ => SocketState::Closed,
        });
        result.map_err(|e| TransportError::Close(e.to_string()))
    }

    fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::SeqCst))
    }
}
