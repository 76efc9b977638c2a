//! Binance USD-M futures liquidation stream.
//!
//! The default endpoint is the combined `!forceOrder@arr` stream, which pushes
//! every liquidation order without a subscription message.

use liqcap_metadata::{CapturerOptions, MetadataError, Venue};

use crate::client::{ClientBuilder, LiquidationStreamClient};
use crate::metrics::StreamMetrics;
use crate::traits::Transport;

/// Build the Binance client from validated options.
pub fn client<T: Transport>(
    options: &CapturerOptions,
    transport: T,
    metrics: &StreamMetrics,
) -> Result<LiquidationStreamClient<T>, MetadataError> {
    let config = options.client_config(Venue::Binance)?;
    Ok(ClientBuilder::new(Venue::Binance.exchange_id(), config)
        .metrics(metrics.clone())
        .build(transport))
}
