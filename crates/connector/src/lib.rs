//! liqcap-connector-lib: streaming liquidation feeds from exchange WebSockets
//!
//! A [`LiquidationStreamClient`] owns one logical connection to one exchange
//! and exposes it as a lazy, cancellable stream of raw
//! [`LiquidationEvent`]s. Sockets come from a [`Transport`]: the
//! tokio-tungstenite one in production, [`memory::InMemoryTransport`] in tests.

pub mod binance;
pub mod client;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod hyperliquid;
pub mod memory;
pub mod metrics;
pub mod traits;
pub mod venues;
pub mod websocket;

pub use client::{ClientBuilder, LiquidationStreamClient};
pub use controller::ConnectionState;
pub use engine::LiquidationStream;
pub use error::{ClientError, ConnectionError, HookError, TransportError};
pub use event::LiquidationEvent;
pub use metrics::{ExchangeMetrics, StreamMetrics};
pub use traits::{ConnectHook, ConnectRequest, Frame, NoopHook, Socket, SocketState, Transport};
pub use websocket::TungsteniteTransport;
