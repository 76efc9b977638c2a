//! liqcap-metadata: Configuration shared by the capturer and its venue adapters
//!
//! Every value is validated when it is bound, so a client never discovers a
//! bad endpoint or buffer size after it has started streaming.

pub mod client;
pub mod error;
pub mod venue;

pub use client::{ClientConfig, ClientConfigBuilder};
pub use error::{ConfigurationError, MetadataError};
pub use venue::{CapturerOptions, Venue, VenueOptions};
