use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::client::{
    keep_alive_from_secs, ClientConfig, DEFAULT_KEEP_ALIVE, DEFAULT_RECEIVE_BUFFER_SIZE,
};
use crate::error::MetadataError;

/// Venues with a liquidation stream adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Binance,
    Hyperliquid,
}

impl Venue {
    pub const ALL: [Venue; 2] = [Venue::Binance, Venue::Hyperliquid];

    /// Identifier stamped on every event produced for this venue.
    pub fn exchange_id(&self) -> &'static str {
        match self {
            Venue::Binance => "Binance",
            Venue::Hyperliquid => "Hyperliquid",
        }
    }

    /// Public endpoint used when the configuration does not name one.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Venue::Binance => "wss://fstream.binance.com/stream?streams=!forceOrder@arr",
            Venue::Hyperliquid => "wss://api.hyperliquid.xyz/ws",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Hyperliquid => "hyperliquid",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-venue overrides. Unset fields fall back to the shared values in
/// [`CapturerOptions`] or the venue defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VenueOptions {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Sent verbatim as a single text frame right after connecting
    #[serde(default)]
    pub subscription_message: Option<String>,
    #[serde(default)]
    pub receive_buffer_size: Option<usize>,
    #[serde(default)]
    pub keep_alive_secs: Option<f64>,
}

/// Capturer configuration file.
///
/// ```yaml
/// receive_buffer_size: 8192
/// keep_alive_secs: 15
/// binance:
///   endpoint: wss://fstream.binance.com/stream?streams=!forceOrder@arr
/// hyperliquid:
///   subscription_message: '{"method":"subscribe","subscription":{"type":"trades","coin":"BTC"}}'
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturerOptions {
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: f64,
    #[serde(default)]
    pub binance: VenueOptions,
    #[serde(default)]
    pub hyperliquid: VenueOptions,
}

fn default_receive_buffer_size() -> usize {
    DEFAULT_RECEIVE_BUFFER_SIZE
}

fn default_keep_alive_secs() -> f64 {
    DEFAULT_KEEP_ALIVE.as_secs_f64()
}

impl Default for CapturerOptions {
    fn default() -> Self {
        Self {
            receive_buffer_size: default_receive_buffer_size(),
            keep_alive_secs: default_keep_alive_secs(),
            binance: VenueOptions::default(),
            hyperliquid: VenueOptions::default(),
        }
    }
}

impl CapturerOptions {
    /// Load options from a YAML file and validate every venue.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let options: CapturerOptions = serde_yaml::from_str(&content)?;
        options.validate()?;
        Ok(options)
    }

    /// Check that every venue resolves to a valid [`ClientConfig`].
    pub fn validate(&self) -> Result<(), MetadataError> {
        for venue in Venue::ALL {
            self.client_config(venue)?;
        }
        Ok(())
    }

    pub fn venue(&self, venue: Venue) -> &VenueOptions {
        match venue {
            Venue::Binance => &self.binance,
            Venue::Hyperliquid => &self.hyperliquid,
        }
    }

    /// Resolve the effective client configuration for a venue.
    pub fn client_config(&self, venue: Venue) -> Result<ClientConfig, MetadataError> {
        let overrides = self.venue(venue);
        let validation = |source| MetadataError::Validation {
            venue: venue.to_string(),
            source,
        };

        let keep_alive =
            keep_alive_from_secs(overrides.keep_alive_secs.unwrap_or(self.keep_alive_secs))
                .map_err(validation)?;

        ClientConfig::new(
            overrides
                .endpoint
                .as_deref()
                .unwrap_or_else(|| venue.default_endpoint()),
            overrides.subscription_message.clone(),
            overrides
                .receive_buffer_size
                .unwrap_or(self.receive_buffer_size),
            keep_alive,
        )
        .map_err(validation)
    }
}
