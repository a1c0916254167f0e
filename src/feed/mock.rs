use futures_util::stream::{self, Stream};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::time::Duration;

use super::TradeEvent;

pub const START_PRICE: f64 = 45_000.0;

/// Seeded random-walk trade generator for development and paper runs.
///
/// Event times come from an internal clock advanced by the same random gap
/// the async stream sleeps for, so a given seed always yields the same
/// sequence of events.
#[derive(Debug, Clone)]
pub struct MockFeed {
    symbol: String,
    price: f64,
    clock_ms: u64,
    delay_ms: (u64, u64),
    rng: StdRng,
}

/// Approximately standard normal: sum of twelve uniforms, recentred.
fn gaussian(rng: &mut StdRng) -> f64 {
    (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0
}

impl MockFeed {
    pub fn new(symbol: &str, seed: u64, start_ms: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: START_PRICE,
            clock_ms: start_ms,
            delay_ms: (10, 50),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_delay(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.delay_ms = (min_ms.min(max_ms), min_ms.max(max_ms));
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn next_gap(&mut self) -> u64 {
        let (lo, hi) = self.delay_ms;
        self.rng.gen_range(lo..=hi)
    }

    pub fn next_event(&mut self) -> TradeEvent {
        self.price = (self.price + 1.5 * gaussian(&mut self.rng)).max(1.0);
        let qty = (0.002 + 0.0015 * gaussian(&mut self.rng)).abs().max(0.0005);
        let ts = self.clock_ms;
        TradeEvent {
            event_type: Some("trade".to_string()),
            event_time: Some(ts),
            trade_time: Some(ts),
            symbol: self.symbol.clone(),
            price: Value::String(format!("{:.2}", self.price)),
            quantity: Value::String(format!("{:.6}", qty)),
            buyer_is_maker: Some(self.rng.gen_bool(0.5)),
        }
    }

    /// Endless event stream with a random pause between events.
    pub fn into_stream(self) -> impl Stream<Item = TradeEvent> + Send {
        stream::unfold(self, |mut feed| async move {
            let event = feed.next_event();
            let gap = feed.next_gap();
            feed.clock_ms += gap;
            tokio::time::sleep(Duration::from_millis(gap)).await;
            Some((event, feed))
        })
    }
}

impl Iterator for MockFeed {
    type Item = TradeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.next_event();
        let gap = self.next_gap();
        self.clock_ms += gap;
        Some(event)
    }
}
