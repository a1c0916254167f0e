//! Market-data boundary: ticks and the adapters that produce them.
//!
//! Sources are transport-agnostic. A live socket, a CSV file and the mock
//! generator all end up as a sequence of [`Tick`]s for one symbol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod csv;
pub mod mock;

pub use mock::MockFeed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "b" => Some(Side::Buy),
            "sell" | "s" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub price: f64,
    pub quantity: f64,
    pub side: Option<Side>,
}

impl Tick {
    /// `None` unless price is positive and quantity non-negative, both finite.
    pub fn new(timestamp: u64, price: f64, quantity: f64, side: Option<Side>) -> Option<Self> {
        if !price.is_finite() || price <= 0.0 || !quantity.is_finite() || quantity < 0.0 {
            return None;
        }
        Some(Self { timestamp, price, quantity, side })
    }
}

/// Exchange trade payload. Price and quantity arrive as strings on the wire
/// and as numbers in replay files, so both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<u64>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    pub trade_time: Option<u64>,
    #[serde(rename = "s", default)]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: Value,
    #[serde(rename = "q", default)]
    pub quantity: Value,
    /// Buyer is maker, i.e. the taker sold.
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub buyer_is_maker: Option<bool>,
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TradeEvent {
    pub fn to_tick(&self) -> Option<Tick> {
        let timestamp = self.event_time.or(self.trade_time)?;
        let price = number(&self.price)?;
        let quantity = number(&self.quantity)?;
        let side = self.buyer_is_maker.map(|m| if m { Side::Sell } else { Side::Buy });
        Tick::new(timestamp, price, quantity, side)
    }
}

pub fn parse_trade_event(raw: &str) -> Option<TradeEvent> {
    serde_json::from_str(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_event_string_fields() {
        let raw = r#"{"e":"trade","E":1700000000123,"T":1700000000120,"s":"BTCUSDT","p":"45000.50","q":"0.002000","m":true}"#;
        let tick = parse_trade_event(raw).and_then(|e| e.to_tick()).unwrap();
        assert_eq!(tick.timestamp, 1_700_000_000_123);
        assert_eq!(tick.price, 45_000.5);
        assert_eq!(tick.quantity, 0.002);
        assert_eq!(tick.side, Some(Side::Sell));
    }

    #[test]
    fn test_trade_event_numeric_fields_and_trade_time() {
        let raw = r#"{"T":42,"s":"ETHUSDT","p":2500.0,"q":1.5,"m":false}"#;
        let tick = parse_trade_event(raw).and_then(|e| e.to_tick()).unwrap();
        assert_eq!(tick.timestamp, 42);
        assert_eq!(tick.side, Some(Side::Buy));
    }

    #[test]
    fn test_malformed_events_are_rejected() {
        assert!(parse_trade_event("not json").is_none());
        let bad_price = parse_trade_event(r#"{"E":1,"s":"X","p":"abc","q":"1"}"#).unwrap();
        assert!(bad_price.to_tick().is_none());
        let no_time = parse_trade_event(r#"{"s":"X","p":"1","q":"1"}"#).unwrap();
        assert!(no_time.to_tick().is_none());
        let negative = parse_trade_event(r#"{"E":1,"s":"X","p":"-3","q":"1"}"#).unwrap();
        assert!(negative.to_tick().is_none());
    }
}
