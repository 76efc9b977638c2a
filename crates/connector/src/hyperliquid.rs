//! Hyperliquid liquidation stream.
//!
//! Hyperliquid pushes nothing until subscribed, so a subscription message is
//! expected in the venue options.

use liqcap_metadata::{CapturerOptions, MetadataError, Venue};
use tracing::warn;

use crate::client::{ClientBuilder, LiquidationStreamClient};
use crate::metrics::StreamMetrics;
use crate::traits::Transport;

/// Build the Hyperliquid client from validated options.
pub fn client<T: Transport>(
    options: &CapturerOptions,
    transport: T,
    metrics: &StreamMetrics,
) -> Result<LiquidationStreamClient<T>, MetadataError> {
    let config = options.client_config(Venue::Hyperliquid)?;
    if config.handshake_message().is_none() {
        warn!(
            exchange = Venue::Hyperliquid.exchange_id(),
            "No subscription message configured; Hyperliquid will not send events"
        );
    }
    Ok(ClientBuilder::new(Venue::Hyperliquid.exchange_id(), config)
        .metrics(metrics.clone())
        .build(transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;
    use liqcap_metadata::VenueOptions;

    #[test]
    fn test_client_carries_subscription() {
        let options = CapturerOptions {
            hyperliquid: VenueOptions {
                subscription_message: Some(r#"{"method":"subscribe"}"#.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let client = client(&options, InMemoryTransport::new(), &StreamMetrics::default()).unwrap();
        assert_eq!(client.exchange_id(), "Hyperliquid");
        assert_eq!(
            client.config().endpoint().as_str(),
            "wss://api.hyperliquid.xyz/ws"
        );
        assert_eq!(
            client.config().handshake_message(),
            Some(r#"{"method":"subscribe"}"#)
        );
    }

    #[test]
    fn test_invalid_override_rejected() {
        let options = CapturerOptions {
            hyperliquid: VenueOptions {
                endpoint: Some("api.hyperliquid.xyz/ws".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(
            client(&options, InMemoryTransport::new(), &StreamMetrics::default()),
            Err(MetadataError::Validation { .. })
        ));
    }
}
