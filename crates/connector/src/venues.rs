//! Client construction for every supported venue.

use liqcap_metadata::{CapturerOptions, MetadataError, Venue};

use crate::client::LiquidationStreamClient;
use crate::metrics::StreamMetrics;
use crate::traits::Transport;
use crate::{binance, hyperliquid};

pub fn build_client<T: Transport>(
    venue: Venue,
    options: &CapturerOptions,
    transport: T,
    metrics: &StreamMetrics,
) -> Result<LiquidationStreamClient<T>, MetadataError> {
    match venue {
        Venue::Binance => binance::client(options, transport, metrics),
        Venue::Hyperliquid => hyperliquid::client(options, transport, metrics),
    }
}

/// One client per venue, in [`Venue::ALL`] order.
///
/// Fails on the first venue whose options do not validate; no client is
/// returned in that case.
pub fn build_all<T: Transport + Clone>(
    options: &CapturerOptions,
    transport: T,
    metrics: &StreamMetrics,
) -> Result<Vec<LiquidationStreamClient<T>>, MetadataError> {
    Venue::ALL
        .iter()
        .map(|venue| build_client(*venue, options, transport.clone(), metrics))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;

    #[test]
    fn test_build_all() {
        let clients = build_all(
            &CapturerOptions::default(),
            InMemoryTransport::new(),
            &StreamMetrics::default(),
        )
        .unwrap();

        let ids: Vec<&str> = clients.iter().map(|c| c.exchange_id()).collect();
        assert_eq!(ids, vec!["Binance", "Hyperliquid"]);
    }

    #[test]
    fn test_build_all_fails_on_invalid_venue() {
        let mut options = CapturerOptions::default();
        options.binance.receive_buffer_size = Some(0);

        let result = build_all(&options, InMemoryTransport::new(), &StreamMetrics::default());
        assert!(result.is_err());
    }
}
