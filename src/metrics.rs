/// Session equity, peak and drawdown for the risk context.
#[derive(Debug, Clone)]
pub struct EquityTracker {
    balance: f64,
    equity: f64,
    peak: f64,
    max_drawdown: f64,
}

impl EquityTracker {
    pub fn new(balance: f64) -> Self {
        Self { balance, equity: balance, peak: balance, max_drawdown: 0.0 }
    }

    /// Re-mark equity as balance + realized + open PnL.
    pub fn update(&mut self, realized_pnl: f64, unrealized_pnl: f64) {
        let equity = self.balance + realized_pnl + unrealized_pnl;
        if !equity.is_finite() {
            return;
        }
        self.equity = equity;
        if equity > self.peak {
            self.peak = equity;
        }
        let dd = self.drawdown();
        if dd > self.max_drawdown {
            self.max_drawdown = dd;
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Fraction of peak lost, in [0, 1].
    pub fn drawdown(&self) -> f64 {
        if self.peak > 0.0 {
            ((self.peak - self.equity) / self.peak).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }
}
