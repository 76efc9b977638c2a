use thiserror::Error;

/// A configuration value that can never produce a working client.
///
/// Raised while binding configuration, before any socket is opened.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("endpoint must be an absolute URI: {0}")]
    RelativeEndpoint(String),
    #[error("endpoint is not a valid URI ({reason}): {value}")]
    InvalidEndpoint { value: String, reason: String },
    #[error("endpoint must use the ws or wss scheme, got {0}")]
    UnsupportedScheme(String),
    #[error("receive buffer size must be greater than zero")]
    InvalidBufferSize,
    #[error("keep-alive interval must be a non-negative number of seconds, got {0}")]
    InvalidKeepAlive(f64),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid {venue} configuration: {source}")]
    Validation {
        venue: String,
        #[source]
        source: ConfigurationError,
    },
}
