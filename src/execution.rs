//! Paper execution: simulated latency and fees over a single-symbol ledger.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ExecConfig;
use crate::decision::{Action, Decision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::OpenLong => "open_long",
            TradeKind::OpenShort => "open_short",
            TradeKind::CloseLong => "close_long",
            TradeKind::CloseShort => "close_short",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: u64,
    pub action: TradeKind,
    pub price: f64,
    /// Unsigned size of the fill.
    pub size: f64,
    pub fee: f64,
    /// Net of fee on closes, 0 on opens.
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub position: f64,
    pub entry_price: Option<f64>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub trades: usize,
}

#[derive(Debug, Clone)]
pub struct PaperTrader {
    fee_rate: f64,
    latency_ms: (f64, f64),
    position: f64,
    entry_price: Option<f64>,
    realized_pnl: f64,
    trades: Vec<TradeRecord>,
}

impl PaperTrader {
    pub fn new(cfg: &ExecConfig) -> Self {
        let lo = cfg.latency_min_ms.min(cfg.latency_max_ms) as f64;
        let hi = cfg.latency_min_ms.max(cfg.latency_max_ms) as f64;
        Self {
            fee_rate: cfg.fee_rate(),
            latency_ms: (lo, hi),
            position: 0.0,
            entry_price: None,
            realized_pnl: 0.0,
            trades: Vec::new(),
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn entry_price(&self) -> Option<f64> {
        self.entry_price
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn trade_log(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// Apply one decision after the simulated latency. Returns the records
    /// appended by this call.
    ///
    /// All ledger mutation happens after the await, so dropping the future
    /// mid-latency leaves the ledger untouched.
    pub async fn process(&mut self, decision: &Decision, price: f64, timestamp: u64) -> Vec<TradeRecord> {
        let delay = self.sample_latency();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.apply(decision, price, timestamp)
    }

    fn sample_latency(&self) -> Duration {
        let (lo, hi) = self.latency_ms;
        if hi <= 0.0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(lo..=hi);
        Duration::from_secs_f64(ms / 1000.0)
    }

    fn fee(&self, price: f64, size: f64) -> f64 {
        (price * size).abs() * self.fee_rate
    }

    fn apply(&mut self, decision: &Decision, price: f64, timestamp: u64) -> Vec<TradeRecord> {
        if !price.is_finite() || price <= 0.0 {
            return Vec::new();
        }
        let start = self.trades.len();

        let closes = match decision.action {
            Action::Hold => return Vec::new(),
            Action::Close => self.position != 0.0,
            Action::OpenLong => self.position < 0.0,
            Action::OpenShort => self.position > 0.0,
        };
        if closes {
            self.close(price, timestamp);
        }

        let opens = match decision.action {
            Action::OpenLong => Some((TradeKind::OpenLong, 1.0)),
            Action::OpenShort => Some((TradeKind::OpenShort, -1.0)),
            _ => None,
        };
        let size = decision.size;
        if let Some((kind, sign)) = opens {
            if self.position == 0.0 && size.is_finite() && size > 0.0 {
                self.position = sign * size;
                self.entry_price = Some(price);
                self.trades.push(TradeRecord {
                    timestamp,
                    action: kind,
                    price,
                    size,
                    fee: self.fee(price, size),
                    pnl: 0.0,
                });
            }
        }

        self.trades[start..].to_vec()
    }

    fn close(&mut self, price: f64, timestamp: u64) {
        let Some(entry) = self.entry_price else {
            return;
        };
        let size = self.position.abs();
        let fee = self.fee(price, size);
        let pnl = (price - entry) * self.position - fee;
        let action = if self.position > 0.0 { TradeKind::CloseLong } else { TradeKind::CloseShort };
        self.realized_pnl += pnl;
        self.trades.push(TradeRecord { timestamp, action, price, size, fee, pnl });
        self.position = 0.0;
        self.entry_price = None;
    }

    /// Mark-to-market against the last recorded fill, or the entry price.
    pub fn summary(&self) -> Summary {
        let reference = self.trades.last().map(|t| t.price).or(self.entry_price);
        Summary {
            position: self.position,
            entry_price: self.entry_price,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: reference.map(|p| self.unrealized_at(p)).unwrap_or(0.0),
            trades: self.trades.len(),
        }
    }

    pub fn unrealized_at(&self, price: f64) -> f64 {
        match self.entry_price {
            Some(entry) if self.position != 0.0 => (price - entry) * self.position,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader(fee_bps: f64) -> PaperTrader {
        PaperTrader::new(&ExecConfig { fee_bps, latency_min_ms: 0, latency_max_ms: 0 })
    }

    fn open_long(size: f64) -> Decision {
        Decision::market(Action::OpenLong, size)
    }

    fn open_short(size: f64) -> Decision {
        Decision::market(Action::OpenShort, size)
    }

    fn close(size: f64) -> Decision {
        Decision::market(Action::Close, size)
    }

    #[tokio::test]
    async fn test_close_long_charges_fee_on_exit_notional() {
        let mut t = trader(2.0);
        t.process(&open_long(0.1), 50_000.0, 1).await;
        let records = t.process(&close(0.1), 50_500.0, 2).await;

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.action, TradeKind::CloseLong);
        assert!((r.fee - 1.01).abs() < 1e-9);
        assert!((r.pnl - 48.99).abs() < 1e-9);
        assert!((t.realized_pnl() - 48.99).abs() < 1e-9);
        assert_eq!(t.position(), 0.0);
        assert_eq!(t.entry_price(), None);
    }

    #[tokio::test]
    async fn test_realized_equals_sum_of_close_pnl() {
        let mut t = trader(2.0);
        let script = [
            (open_long(0.2), 100.0),
            (close(0.2), 103.0),
            (open_short(0.5), 104.0),
            (open_long(0.3), 101.0),
            (close(0.3), 99.5),
            (open_short(1.0), 100.0),
            (close(1.0), 100.7),
        ];
        for (i, (d, p)) in script.iter().enumerate() {
            t.process(d, *p, i as u64).await;
        }
        let closes: f64 = t
            .trade_log()
            .iter()
            .filter(|r| matches!(r.action, TradeKind::CloseLong | TradeKind::CloseShort))
            .map(|r| r.pnl)
            .sum();
        assert!((t.realized_pnl() - closes).abs() < 1e-9);
        assert!(t.trade_log().iter().all(|r| r.fee >= 0.0));
    }

    #[tokio::test]
    async fn test_no_double_open() {
        let mut t = trader(0.0);
        t.process(&open_long(0.1), 100.0, 1).await;
        let again = t.process(&open_long(0.4), 101.0, 2).await;
        assert!(again.is_empty());
        assert_eq!(t.position(), 0.1);
        assert_eq!(t.entry_price(), Some(100.0));
    }

    #[tokio::test]
    async fn test_close_while_flat_and_hold_are_noops() {
        let mut t = trader(2.0);
        assert!(t.process(&close(1.0), 100.0, 1).await.is_empty());
        assert!(t.process(&Decision::hold(), 100.0, 2).await.is_empty());
        assert!(t.process(&open_long(0.0), 100.0, 3).await.is_empty());
        assert_eq!(t.summary().trades, 0);
    }

    #[tokio::test]
    async fn test_opposite_open_closes_then_reverses() {
        let mut t = trader(0.0);
        t.process(&open_long(0.1), 100.0, 1).await;
        let records = t.process(&open_short(0.2), 90.0, 2).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, TradeKind::CloseLong);
        assert!((records[0].pnl + 1.0).abs() < 1e-9);
        assert_eq!(records[1].action, TradeKind::OpenShort);
        assert_eq!(records[1].pnl, 0.0);
        assert_eq!(t.position(), -0.2);
        assert_eq!(t.entry_price(), Some(90.0));
    }

    #[tokio::test]
    async fn test_short_pnl_sign() {
        let mut t = trader(0.0);
        t.process(&open_short(2.0), 100.0, 1).await;
        assert!((t.unrealized_at(95.0) - 10.0).abs() < 1e-9);
        t.process(&close(2.0), 95.0, 2).await;
        assert!((t.realized_pnl() - 10.0).abs() < 1e-9);
        assert_eq!(t.trade_log()[1].action, TradeKind::CloseShort);
    }

    #[tokio::test]
    async fn test_summary_marks_to_last_fill() {
        let mut t = trader(0.0);
        t.process(&open_long(1.0), 100.0, 1).await;
        let s = t.summary();
        assert_eq!(s.position, 1.0);
        assert_eq!(s.entry_price, Some(100.0));
        assert_eq!(s.unrealized_pnl, 0.0);
        assert_eq!(s.trades, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_bounded() {
        let mut t = PaperTrader::new(&ExecConfig { fee_bps: 2.0, latency_min_ms: 2, latency_max_ms: 5 });
        let start = tokio::time::Instant::now();
        t.process(&open_long(0.1), 100.0, 1).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2));
        assert!(waited <= Duration::from_millis(6));
    }
}
