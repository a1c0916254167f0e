//! Signal outputs, the pre-trade block filter and the multi-horizon combiner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SignalConfig;
use crate::features::FeatureVector;
use crate::logging::log_predictor_failure;
use crate::predictor::PredictorRegistry;

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// One predictor's view: probabilities plus derived edge and direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalOutput {
    pub p_up: f64,
    pub p_down: f64,
    /// p_up - 0.5
    pub edge: f64,
    pub direction: i8,
}

impl SignalOutput {
    /// Validates that both probabilities are in [0, 1] and sum to 1.
    pub fn from_probs(p_down: f64, p_up: f64) -> Option<Self> {
        let in_range = |p: f64| p.is_finite() && (0.0..=1.0).contains(&p);
        if !in_range(p_up) || !in_range(p_down) || (p_up + p_down - 1.0).abs() > 1e-6 {
            return None;
        }
        let edge = p_up - 0.5;
        Some(Self { p_up, p_down, edge, direction: sign(edge) })
    }

    /// Pseudo-signal carrying the ensemble's meta edge, used by the risk gate
    /// and the state machine.
    pub fn from_meta(meta: &EnsembleOutput) -> Self {
        let p_up = (0.5 + meta.meta_edge).clamp(0.0, 1.0);
        Self {
            p_up,
            p_down: 1.0 - p_up,
            edge: meta.meta_edge,
            direction: meta.direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOutput {
    pub meta_edge: f64,
    pub direction: i8,
    /// Only horizons that produced a result this tick.
    pub components: BTreeMap<u32, SignalOutput>,
}

impl EnsembleOutput {
    pub fn empty() -> Self {
        Self { meta_edge: 0.0, direction: 0, components: BTreeMap::new() }
    }

    /// No horizon contributed; callers must not trade on this.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

// =============================================================================
// Block filter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    LowVolatility,
    PriceShock,
    Inactivity,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::LowVolatility => "volatility too low",
            BlockReason::PriceShock => "sudden price shock",
            BlockReason::Inactivity => "inactivity",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dead, shocked or idle markets never reach a predictor.
pub fn filter_blocks(features: &FeatureVector, cfg: &SignalConfig) -> Option<BlockReason> {
    if features.ret_std_10().abs() < cfg.min_volatility {
        return Some(BlockReason::LowVolatility);
    }
    if features.ret_1().abs() > cfg.shock_threshold {
        return Some(BlockReason::PriceShock);
    }
    if features.vol_sum_10() < cfg.min_activity {
        return Some(BlockReason::Inactivity);
    }
    None
}

// =============================================================================
// Combiner
// =============================================================================

/// Weights renormalized over the horizons present in `outputs`.
pub fn normalized_weights(
    weights: &BTreeMap<u32, f64>,
    outputs: &BTreeMap<u32, SignalOutput>,
) -> BTreeMap<u32, f64> {
    let total: f64 = outputs.keys().map(|h| weights.get(h).copied().unwrap_or(0.0)).sum();
    let total = if total == 0.0 { 1.0 } else { total };
    outputs
        .keys()
        .map(|h| (*h, weights.get(h).copied().unwrap_or(0.0) / total))
        .collect()
}

pub fn combine(weights: &BTreeMap<u32, f64>, outputs: BTreeMap<u32, SignalOutput>) -> EnsembleOutput {
    if outputs.is_empty() {
        return EnsembleOutput::empty();
    }
    let norm = normalized_weights(weights, &outputs);
    let meta_edge: f64 = outputs.iter().map(|(h, out)| out.edge * norm[h]).sum();
    EnsembleOutput { meta_edge, direction: sign(meta_edge), components: outputs }
}

pub struct SignalCombiner {
    registry: Arc<PredictorRegistry>,
    cfg: SignalConfig,
}

impl SignalCombiner {
    pub fn new(registry: Arc<PredictorRegistry>, cfg: SignalConfig) -> Self {
        Self { registry, cfg }
    }

    pub fn filter(&self, features: &FeatureVector) -> Option<BlockReason> {
        filter_blocks(features, &self.cfg)
    }

    /// Fan out to every registered horizon; a failing predictor only drops
    /// its own contribution.
    pub fn predict(&self, features: &FeatureVector) -> EnsembleOutput {
        let mut outputs = BTreeMap::new();
        for (h, predictor) in self.registry.iter() {
            match predictor.predict(features) {
                Ok(out) => {
                    outputs.insert(h, out);
                }
                Err(err) => log_predictor_failure(h, &format!("{:#}", err)),
            }
        }
        combine(&self.cfg.weights, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::NUM_FEATURES;
    use crate::predictor::HorizonPredictor;
    use anyhow::{anyhow, Result};

    struct Fixed {
        horizon: u32,
        p_up: f64,
    }

    impl HorizonPredictor for Fixed {
        fn horizon(&self) -> u32 {
            self.horizon
        }
        fn predict(&self, _: &FeatureVector) -> Result<SignalOutput> {
            SignalOutput::from_probs(1.0 - self.p_up, self.p_up).ok_or_else(|| anyhow!("bad"))
        }
    }

    struct Broken(u32);

    impl HorizonPredictor for Broken {
        fn horizon(&self) -> u32 {
            self.0
        }
        fn predict(&self, _: &FeatureVector) -> Result<SignalOutput> {
            Err(anyhow!("model exploded"))
        }
    }

    fn fv(ret_1: f64, ret_std_10: f64, vol_sum_10: f64) -> FeatureVector {
        let mut v = [0.0; NUM_FEATURES];
        v[0] = ret_1;
        v[7] = ret_std_10;
        v[10] = vol_sum_10;
        FeatureVector::new(v).unwrap()
    }

    fn sig(p_up: f64) -> SignalOutput {
        SignalOutput::from_probs(1.0 - p_up, p_up).unwrap()
    }

    #[test]
    fn test_block_low_volatility() {
        let cfg = SignalConfig::default();
        assert_eq!(filter_blocks(&fv(0.0, 1e-7, 5.0), &cfg), Some(BlockReason::LowVolatility));
        assert_eq!(BlockReason::LowVolatility.as_str(), "volatility too low");
    }

    #[test]
    fn test_block_shock_and_inactivity() {
        let cfg = SignalConfig::default();
        assert_eq!(filter_blocks(&fv(-0.02, 1e-3, 5.0), &cfg), Some(BlockReason::PriceShock));
        assert_eq!(filter_blocks(&fv(0.001, 1e-3, 0.0), &cfg), Some(BlockReason::Inactivity));
        assert_eq!(filter_blocks(&fv(0.001, 1e-3, 5.0), &cfg), None);
    }

    #[test]
    fn test_signal_output_validation() {
        assert!(SignalOutput::from_probs(0.3, 0.6).is_none());
        assert!(SignalOutput::from_probs(-0.1, 1.1).is_none());
        let s = sig(0.6);
        assert!((s.edge - 0.1).abs() < 1e-12);
        assert_eq!(s.direction, 1);
        assert_eq!(sig(0.4).direction, -1);
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let weights = SignalConfig::default().weights;
        let subsets: [&[u32]; 5] = [&[1], &[3], &[1, 10], &[3, 10], &[1, 3, 10]];
        for subset in subsets {
            let outputs: BTreeMap<u32, SignalOutput> = subset.iter().map(|h| (*h, sig(0.6))).collect();
            let total: f64 = normalized_weights(&weights, &outputs).values().sum();
            assert!((total - 1.0).abs() < 1e-12, "subset {:?} sums to {}", subset, total);
        }
    }

    #[test]
    fn test_combine_weights_edges() {
        let weights = SignalConfig::default().weights;
        let outputs = BTreeMap::from([(1, sig(0.6)), (3, sig(0.4))]);
        let out = combine(&weights, outputs);
        // (0.5 * 0.1 + 0.3 * -0.1) / 0.8
        assert!((out.meta_edge - 0.025).abs() < 1e-12);
        assert_eq!(out.direction, 1);
        assert_eq!(out.components.len(), 2);
    }

    #[test]
    fn test_combine_empty_is_no_trade() {
        let out = combine(&SignalConfig::default().weights, BTreeMap::new());
        assert_eq!(out.meta_edge, 0.0);
        assert_eq!(out.direction, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unweighted_horizon_does_not_divide_by_zero() {
        let out = combine(&BTreeMap::new(), BTreeMap::from([(7, sig(0.9))]));
        assert_eq!(out.meta_edge, 0.0);
        assert_eq!(out.direction, 0);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_failing_predictor_is_excluded() {
        let registry = PredictorRegistry::new()
            .with(Box::new(Fixed { horizon: 1, p_up: 0.7 }))
            .with(Box::new(Broken(3)));
        let combiner = SignalCombiner::new(Arc::new(registry), SignalConfig::default());
        let out = combiner.predict(&fv(0.001, 1e-3, 5.0));
        assert_eq!(out.components.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert!((out.meta_edge - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_meta_pseudo_signal() {
        let meta = EnsembleOutput { meta_edge: -0.05, direction: -1, components: BTreeMap::new() };
        let s = SignalOutput::from_meta(&meta);
        assert!((s.p_up - 0.45).abs() < 1e-12);
        assert!((s.p_down - 0.55).abs() < 1e-12);
        assert_eq!(s.direction, -1);
    }
}
