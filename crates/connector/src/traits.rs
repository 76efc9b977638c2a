use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

use crate::error::{HookError, TransportError};
use liqcap_metadata::ClientConfig;

/// Value sent as `User-Agent` on every upgrade request.
pub const USER_AGENT: &str = concat!("liqcap/", env!("CARGO_PKG_VERSION"));

/// Close status sent when we end a connection normally.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// One physical frame read from a socket.
///
/// Data frames carry `fin`: a logical message is complete only when a frame
/// with `fin == true` arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text { data: Bytes, fin: bool },
    Binary { data: Bytes, fin: bool },
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Single-frame text message (test and adapter convenience).
    pub fn text(payload: impl Into<String>) -> Self {
        Frame::Text {
            data: Bytes::from(payload.into()),
            fin: true,
        }
    }

    /// Text fragment; `fin` marks the last fragment of the message.
    pub fn fragment(payload: impl Into<String>, fin: bool) -> Self {
        Frame::Text {
            data: Bytes::from(payload.into()),
            fin,
        }
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Frame::Close(Some(CloseReason {
            code,
            reason: reason.into(),
        }))
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text { .. } => "text",
            Frame::Binary { .. } => "binary",
            Frame::Ping(_) => "ping",
            Frame::Pong(_) => "pong",
            Frame::Close(_) => "close",
        }
    }
}

/// Lifecycle of a physical socket as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    Open = 0,
    CloseReceived = 1,
    CloseSent = 2,
    Closed = 3,
}

impl SocketState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SocketState::Open,
            1 => SocketState::CloseReceived,
            2 => SocketState::CloseSent,
            _ => SocketState::Closed,
        }
    }

    /// Whether a close handshake can still be started from our side.
    pub fn can_close(&self) -> bool {
        matches!(self, SocketState::Open | SocketState::CloseReceived)
    }
}

/// Everything a transport needs to open one socket.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub endpoint: Url,
    pub headers: Vec<(String, String)>,
    pub keep_alive: Duration,
    pub receive_buffer_size: usize,
}

impl ConnectRequest {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.endpoint().clone(),
            headers: vec![("User-Agent".to_string(), USER_AGENT.to_string())],
            keep_alive: config.keep_alive(),
            receive_buffer_size: config.receive_buffer_size(),
        }
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A connected WebSocket.
///
/// Methods take `&self` so a close can be issued while another task is parked
/// in [`receive`](Socket::receive). Dropping the socket releases it without a
/// close handshake.
#[async_trait]
pub trait Socket: Send + Sync + 'static {
    /// Receive the next physical frame. Must be cancel-safe: dropping the
    /// future between frames loses no data.
    async fn receive(&self) -> Result<Frame, TransportError>;

    /// Send one complete text message.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Start (or answer) the close handshake.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;

    fn state(&self) -> SocketState;
}

/// Opens physical sockets. One successful `open` is one socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Socket: Socket;

    async fn open(&self, request: &ConnectRequest) -> Result<Self::Socket, TransportError>;
}

/// Venue-specific connection hooks.
///
/// Venues differ only in data and these two hook points; the streaming logic
/// is shared.
#[async_trait]
pub trait ConnectHook: Send + Sync + 'static {
    /// Adjust the upgrade request (headers) before the socket is opened.
    fn configure_request(&self, _request: &mut ConnectRequest) {}

    /// Runs after the socket opens and before the handshake message is sent.
    async fn on_connected(&self, _socket: &dyn Socket) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hook that leaves the connection untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl ConnectHook for NoopHook {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_from_config() {
        let config = ClientConfig::builder("wss://api.hyperliquid.xyz/ws")
            .receive_buffer_size(1024)
            .keep_alive(Duration::from_secs(5))
            .build()
            .unwrap();

        let request = ConnectRequest::from_config(&config);
        assert_eq!(request.endpoint.as_str(), "wss://api.hyperliquid.xyz/ws");
        assert_eq!(request.receive_buffer_size, 1024);
        assert_eq!(request.keep_alive, Duration::from_secs(5));
        assert_eq!(request.header("user-agent"), Some(USER_AGENT));
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let config = ClientConfig::builder("ws://localhost:1").build().unwrap();
        let mut request = ConnectRequest::from_config(&config);
        request.set_header("user-agent", "custom");
        request.set_header("X-Api-Key", "k");

        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.header("User-Agent"), Some("custom"));
        assert_eq!(request.header("x-api-key"), Some("k"));
    }

    #[test]
    fn test_socket_state_round_trip() {
        for state in [
            SocketState::Open,
            SocketState::CloseReceived,
            SocketState::CloseSent,
            SocketState::Closed,
        ] {
            assert_eq!(SocketState::from_u8(state as u8), state);
        }
        assert!(SocketState::Open.can_close());
        assert!(SocketState::CloseReceived.can_close());
        assert!(!SocketState::CloseSent.can_close());
        assert!(!SocketState::Closed.can_close());
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::text("x").kind(), "text");
        assert_eq!(Frame::close(NORMAL_CLOSURE, "bye").kind(), "close");
        assert_eq!(Frame::Ping(Bytes::new()).kind(), "ping");
    }
}
