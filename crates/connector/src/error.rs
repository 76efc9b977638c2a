use thiserror::Error;

/// Failure reported by a [`Transport`](crate::traits::Transport) or
/// [`Socket`](crate::traits::Socket).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("close failed: {0}")]
    Close(String),
    #[error("connection closed without a close frame")]
    ConnectionClosed,
}

/// Failure reported by a venue [`ConnectHook`](crate::traits::ConnectHook).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

/// Why a connect attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("transport connect failed: {0}")]
    Transport(#[source] TransportError),
    #[error("post-connect hook failed: {0}")]
    Hook(#[from] HookError),
    #[error("handshake send failed: {0}")]
    Handshake(#[source] TransportError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("client is already streaming")]
    AlreadyStreaming,
    #[error("client has been disposed")]
    Disposed,
    #[error("stream terminated: {0}")]
    StreamTerminated(#[source] TransportError),
    #[error("operation cancelled")]
    Cancelled,
}
