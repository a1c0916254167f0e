//! Incremental tick features.
//!
//! The window keeps the last 11 prices and 10 quantities. Once full it emits
//! an 11-slot [`FeatureVector`] in the order every downstream consumer
//! (block filter, predictors, risk gate fingerprint) relies on.

use serde::{Deserialize, Serialize};

pub const NUM_FEATURES: usize = 11;

/// Longest lookback window in returns.
pub const MAX_WINDOW: usize = 10;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "ret_1",
    "ret_log_1",
    "ret_mean_3",
    "ret_std_3",
    "ret_mean_5",
    "ret_std_5",
    "ret_mean_10",
    "ret_std_10",
    "vol_sum_3",
    "vol_sum_5",
    "vol_sum_10",
];

/// Slot indices into a [`FeatureVector`].
pub mod idx {
    pub const RET_1: usize = 0;
    pub const RET_LOG_1: usize = 1;
    pub const RET_MEAN_3: usize = 2;
    pub const RET_STD_3: usize = 3;
    pub const RET_MEAN_5: usize = 4;
    pub const RET_STD_5: usize = 5;
    pub const RET_MEAN_10: usize = 6;
    pub const RET_STD_10: usize = 7;
    pub const VOL_SUM_3: usize = 8;
    pub const VOL_SUM_5: usize = 9;
    pub const VOL_SUM_10: usize = 10;
}

/// Fixed-order feature vector. Construction guarantees every slot is finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; NUM_FEATURES]);

impl FeatureVector {
    /// Returns `None` if any component is NaN or infinite.
    pub fn new(values: [f64; NUM_FEATURES]) -> Option<Self> {
        if values.iter().all(|v| v.is_finite()) {
            Some(Self(values))
        } else {
            None
        }
    }

    pub fn as_array(&self) -> &[f64; NUM_FEATURES] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES.iter().position(|n| *n == name).map(|i| self.0[i])
    }

    pub fn ret_1(&self) -> f64 {
        self.0[idx::RET_1]
    }

    pub fn ret_log_1(&self) -> f64 {
        self.0[idx::RET_LOG_1]
    }

    pub fn ret_std_10(&self) -> f64 {
        self.0[idx::RET_STD_10]
    }

    pub fn vol_sum_10(&self) -> f64 {
        self.0[idx::VOL_SUM_10]
    }
}

/// Fixed-capacity ring, oldest entry overwritten first.
#[derive(Debug, Clone)]
struct RingBuffer {
    buf: Vec<f64>,
    idx: usize,
    len: usize,
}

impl RingBuffer {
    fn new(size: usize) -> Self {
        Self { buf: vec![0.0; size], idx: 0, len: 0 }
    }

    fn push(&mut self, value: f64) {
        self.buf[self.idx] = value;
        self.idx = (self.idx + 1) % self.buf.len();
        self.len = (self.len + 1).min(self.buf.len());
    }

    fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Oldest to newest.
    fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let start = (self.idx + self.buf.len() - self.len) % self.buf.len();
        (0..self.len).map(move |i| self.buf[(start + i) % self.buf.len()])
    }
}

/// Result of feeding one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureUpdate {
    NotReady,
    Ready(FeatureVector),
}

impl FeatureUpdate {
    pub fn ready(self) -> Option<FeatureVector> {
        match self {
            FeatureUpdate::Ready(v) => Some(v),
            FeatureUpdate::NotReady => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureWindow {
    prices: RingBuffer,
    quantities: RingBuffer,
}

impl Default for FeatureWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureWindow {
    pub fn new() -> Self {
        Self {
            prices: RingBuffer::new(MAX_WINDOW + 1),
            quantities: RingBuffer::new(MAX_WINDOW),
        }
    }

    /// Record a tick and emit features once 11 prices are buffered.
    /// The timestamp is accepted for the call contract; ordering is enforced
    /// by the caller.
    pub fn add_tick(&mut self, _timestamp: u64, price: f64, quantity: f64) -> FeatureUpdate {
        self.prices.push(price);
        self.quantities.push(quantity);

        if !self.prices.is_full() {
            return FeatureUpdate::NotReady;
        }
        match self.compute() {
            Some(v) => FeatureUpdate::Ready(v),
            None => FeatureUpdate::NotReady,
        }
    }

    fn compute(&self) -> Option<FeatureVector> {
        let prices: Vec<f64> = self.prices.iter().collect();
        let qty: Vec<f64> = self.quantities.iter().collect();

        let rets: Vec<f64> = prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let n = prices.len();
        let ret_log_1 = prices[n - 1].ln() - prices[n - 2].ln();

        let (mean_3, std_3) = mean_std(tail(&rets, 3));
        let (mean_5, std_5) = mean_std(tail(&rets, 5));
        let (mean_10, std_10) = mean_std(tail(&rets, 10));

        FeatureVector::new([
            rets[rets.len() - 1],
            ret_log_1,
            mean_3,
            std_3,
            mean_5,
            std_5,
            mean_10,
            std_10,
            tail(&qty, 3).iter().sum(),
            tail(&qty, 5).iter().sum(),
            tail(&qty, 10).iter().sum(),
        ])
    }
}

fn tail(xs: &[f64], w: usize) -> &[f64] {
    &xs[xs.len().saturating_sub(w)..]
}

/// Mean and population standard deviation.
fn mean_std(xs: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
