use chrono::{DateTime, Utc};
use serde::Serialize;

/// One complete liquidation message as received from a venue.
///
/// The payload is the reassembled text of a single logical WebSocket message,
/// untouched. `received_at` is the local capture time, not the venue timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidationEvent {
    exchange: String,
    #[serde(rename = "raw")]
    raw_payload: String,
    received_at: DateTime<Utc>,
}

impl LiquidationEvent {
    /// Create an event stamped with the current time.
    #[inline]
    pub fn new(exchange: impl Into<String>, raw_payload: String) -> Self {
        Self::with_timestamp(exchange, raw_payload, Utc::now())
    }

    pub fn with_timestamp(
        exchange: impl Into<String>,
        raw_payload: String,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            raw_payload,
            received_at,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn into_raw_payload(self) -> String {
        self.raw_payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_stamped_at_capture() {
        let before = Utc::now();
        let event = LiquidationEvent::new("Binance", r#"{"e":"forceOrder"}"#.to_string());
        let after = Utc::now();

        assert_eq!(event.exchange(), "Binance");
        assert_eq!(event.raw_payload(), r#"{"e":"forceOrder"}"#);
        assert!(event.received_at() >= before && event.received_at() <= after);
    }

    #[test]
    fn test_event_serializes_raw_payload_as_string() {
        let ts = DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = LiquidationEvent::with_timestamp("Hyperliquid", r#"{"a":1}"#.to_string(), ts);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["exchange"], "Hyperliquid");
        assert_eq!(json["raw"], r#"{"a":1}"#);
        assert_eq!(json["received_at"], "2025-01-02T03:04:05Z");
    }
}
