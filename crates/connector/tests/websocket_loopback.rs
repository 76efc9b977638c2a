//! End-to-end test of the tokio-tungstenite transport against a local server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use liqcap_connector_lib::traits::USER_AGENT;
use liqcap_connector_lib::{LiquidationStreamClient, TungsteniteTransport};
use liqcap_metadata::ClientConfig;

const SUBSCRIBE: &str = r#"{"method":"subscribe"}"#;
const PAYLOAD: &str = r#"{"e":"forceOrder","o":{"s":"BTCUSDT","S":"SELL","q":"0.014"}}"#;

#[tokio::test]
async fn test_stream_over_real_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (agent_tx, agent_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let agent = request
                .headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = agent_tx.send(agent);
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();

        let subscribe = ws.next().await.unwrap().unwrap();
        assert_eq!(subscribe, Message::Text(SUBSCRIBE.to_string()));

        ws.send(Message::Text("  ".to_string())).await.unwrap();
        ws.send(Message::Ping(vec![7])).await.unwrap();
        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text(PAYLOAD.to_string())).await.unwrap();
        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        })))
        .await
        .unwrap();

        // Wait for the client's side of the close handshake.
        let mut close_answered = false;
        let mut pongs = 0;
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Close(_)) => close_answered = true,
                Ok(Message::Pong(data)) => {
                    assert_eq!(data, vec![7]);
                    pongs += 1;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        (close_answered, pongs)
    });

    // Small buffer so the payload arrives as several chunks.
    let config = ClientConfig::builder(format!("ws://{addr}/ws"))
        .handshake_message(SUBSCRIBE)
        .receive_buffer_size(8)
        .keep_alive(Duration::ZERO)
        .build()
        .unwrap();
    let client = LiquidationStreamClient::new("Loopback", config, TungsteniteTransport);

    let events: Vec<_> = tokio::time::timeout(
        Duration::from_secs(10),
        client
            .stream_events(CancellationToken::new())
            .unwrap()
            .collect::<Vec<_>>(),
    )
    .await
    .unwrap();

    assert_eq!(events.len(), 1);
    let event = events[0].as_ref().unwrap();
    assert_eq!(event.exchange(), "Loopback");
    assert_eq!(event.raw_payload(), PAYLOAD);

    assert_eq!(agent_rx.await.unwrap().as_deref(), Some(USER_AGENT));
    let (close_answered, pongs) = server.await.unwrap();
    assert!(close_answered);
    // Exactly one pong per ping.
    assert_eq!(pongs, 1);

    client.dispose().await;
}

#[tokio::test]
async fn test_connection_refused_is_connection_error() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = ClientConfig::builder(format!("ws://{addr}/ws")).build().unwrap();
    let client = LiquidationStreamClient::new("Loopback", config, TungsteniteTransport);

    let err = client.connect(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(
        err,
        liqcap_connector_lib::ClientError::Connection(
            liqcap_connector_lib::ConnectionError::Transport(_)
        )
    ));
    assert_eq!(
        client.state(),
        liqcap_connector_lib::ConnectionState::Disconnected
    );
}
