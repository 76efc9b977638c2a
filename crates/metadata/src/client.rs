use std::time::Duration;

use url::Url;

use crate::error::ConfigurationError;

/// Receive buffer size used when none is configured.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 8192;

/// Keep-alive interval used when none is configured.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Validated settings for one streaming client.
///
/// The only way to obtain a `ClientConfig` is through [`ClientConfig::new`] or
/// the builder, both of which reject invalid values up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    endpoint: Url,
    handshake_message: Option<String>,
    receive_buffer_size: usize,
    keep_alive: Duration,
}

impl ClientConfig {
    /// Validate and build a client configuration.
    ///
    /// A handshake message that is empty or whitespace-only is treated as absent.
    /// A zero `keep_alive` disables protocol-level pings.
    pub fn new(
        endpoint: &str,
        handshake_message: Option<String>,
        receive_buffer_size: usize,
        keep_alive: Duration,
    ) -> Result<Self, ConfigurationError> {
        let endpoint = parse_endpoint(endpoint)?;

        if receive_buffer_size == 0 {
            return Err(ConfigurationError::InvalidBufferSize);
        }

        Ok(Self {
            endpoint,
            handshake_message: handshake_message.filter(|m| !m.trim().is_empty()),
            receive_buffer_size,
            keep_alive,
        })
    }

    /// Start a builder with default buffer size and keep-alive.
    pub fn builder(endpoint: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            endpoint: endpoint.into(),
            handshake_message: None,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn handshake_message(&self) -> Option<&str> {
        self.handshake_message.as_deref()
    }

    pub fn receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Whether protocol-level pings are enabled.
    pub fn keep_alive_enabled(&self) -> bool {
        !self.keep_alive.is_zero()
    }
}

/// Fluent construction of a [`ClientConfig`]; validation runs in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    endpoint: String,
    handshake_message: Option<String>,
    receive_buffer_size: usize,
    keep_alive: Duration,
}

impl ClientConfigBuilder {
    pub fn handshake_message(mut self, message: impl Into<String>) -> Self {
        self.handshake_message = Some(message.into());
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigurationError> {
        ClientConfig::new(
            &self.endpoint,
            self.handshake_message,
            self.receive_buffer_size,
            self.keep_alive,
        )
    }
}

/// Convert a keep-alive given in (possibly fractional) seconds.
pub(crate) fn keep_alive_from_secs(secs: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigurationError::InvalidKeepAlive(secs))
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigurationError> {
    let url = Url::parse(raw.trim()).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => {
            ConfigurationError::RelativeEndpoint(raw.to_string())
        }
        other => ConfigurationError::InvalidEndpoint {
            value: raw.to_string(),
            reason: other.to_string(),
        },
    })?;

    // Url lowercases the scheme, so "WSS://" is accepted here as well.
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigurationError::UnsupportedScheme(other.to_string())),
    }
}
