//! Prometheus metrics for liquidation streams
//!
//! Metrics are registered on a caller-supplied registry and labelled by exchange.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

const LABEL_EXCHANGE: &str = "exchange";
const LABEL_OUTCOME: &str = "outcome";
const LABEL_KIND: &str = "kind";
const LABEL_REASON: &str = "reason";

/// Shared metric families. Cheap to clone.
#[derive(Clone)]
pub struct StreamMetrics {
    connects: IntCounterVec,
    frames: IntCounterVec,
    events: IntCounterVec,
    fragmented_messages: IntCounterVec,
    discarded_messages: IntCounterVec,
    terminations: IntCounterVec,
    connected: IntGaugeVec,
}

impl StreamMetrics {
    /// Create the metric families and register them on `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self::build()?;
        registry.register(Box::new(metrics.connects.clone()))?;
        registry.register(Box::new(metrics.frames.clone()))?;
        registry.register(Box::new(metrics.events.clone()))?;
        registry.register(Box::new(metrics.fragmented_messages.clone()))?;
        registry.register(Box::new(metrics.discarded_messages.clone()))?;
        registry.register(Box::new(metrics.terminations.clone()))?;
        registry.register(Box::new(metrics.connected.clone()))?;
        Ok(metrics)
    }

    fn build() -> prometheus::Result<Self> {
        Ok(Self {
            connects: IntCounterVec::new(
                Opts::new("liqcap_connects_total", "Connect attempts by outcome"),
                &[LABEL_EXCHANGE, LABEL_OUTCOME],
            )?,
            frames: IntCounterVec::new(
                Opts::new("liqcap_frames_total", "WebSocket frames received by kind"),
                &[LABEL_EXCHANGE, LABEL_KIND],
            )?,
            events: IntCounterVec::new(
                Opts::new("liqcap_events_total", "Liquidation events yielded to consumers"),
                &[LABEL_EXCHANGE],
            )?,
            fragmented_messages: IntCounterVec::new(
                Opts::new(
                    "liqcap_fragmented_messages_total",
                    "Messages reassembled from more than one frame",
                ),
                &[LABEL_EXCHANGE],
            )?,
            discarded_messages: IntCounterVec::new(
                Opts::new(
                    "liqcap_discarded_messages_total",
                    "Empty or whitespace-only messages dropped",
                ),
                &[LABEL_EXCHANGE],
            )?,
            terminations: IntCounterVec::new(
                Opts::new("liqcap_stream_terminations_total", "Event streams ended by reason"),
                &[LABEL_EXCHANGE, LABEL_REASON],
            )?,
            connected: IntGaugeVec::new(
                Opts::new(
                    "liqcap_websocket_connected",
                    "WebSocket connection status (1=connected, 0=disconnected)",
                ),
                &[LABEL_EXCHANGE],
            )?,
        })
    }

    /// Handle for one exchange.
    pub fn for_exchange(&self, exchange: impl Into<String>) -> ExchangeMetrics {
        ExchangeMetrics {
            families: self.clone(),
            exchange: exchange.into(),
        }
    }
}

impl Default for StreamMetrics {
    /// Metric families that are not registered anywhere.
    fn default() -> Self {
        Self::build().expect("static metric definitions are valid")
    }
}

/// Metrics handle bound to one exchange label.
#[derive(Clone)]
pub struct ExchangeMetrics {
    families: StreamMetrics,
    exchange: String,
}

impl ExchangeMetrics {
    pub fn connect_outcome(&self, outcome: &str) {
        self.families
            .connects
            .with_label_values(&[&self.exchange, outcome])
            .inc();
    }

    pub fn frame(&self, kind: &str) {
        self.families
            .frames
            .with_label_values(&[&self.exchange, kind])
            .inc();
    }

    pub fn event(&self) {
        self.families
            .events
            .with_label_values(&[&self.exchange])
            .inc();
    }

    pub fn fragmented_message(&self) {
        self.families
            .fragmented_messages
            .with_label_values(&[&self.exchange])
            .inc();
    }

    pub fn discarded_message(&self) {
        self.families
            .discarded_messages
            .with_label_values(&[&self.exchange])
            .inc();
    }

    pub fn terminated(&self, reason: &str) {
        self.families
            .terminations
            .with_label_values(&[&self.exchange, reason])
            .inc();
    }

    pub fn set_connected(&self, connected: bool) {
        self.families
            .connected
            .with_label_values(&[&self.exchange])
            .set(i64::from(connected));
    }

    pub fn is_connected(&self) -> bool {
        self.families
            .connected
            .with_label_values(&[&self.exchange])
            .get()
            == 1
    }

    pub fn events_total(&self) -> u64 {
        self.families
            .events
            .with_label_values(&[&self.exchange])
            .get()
    }

    pub fn terminations_total(&self, reason: &str) -> u64 {
        self.families
            .terminations
            .with_label_values(&[&self.exchange, reason])
            .get()
    }
}
