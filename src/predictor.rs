//! Horizon predictors and the registry that owns them.
//!
//! A predictor maps a [`FeatureVector`] to an up/down probability pair for
//! one prediction horizon. Trained artifacts are produced elsewhere; this
//! module only loads them and enforces the online contract.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::features::{FeatureVector, FEATURE_NAMES, NUM_FEATURES};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::signals::SignalOutput;

pub trait HorizonPredictor: Send + Sync {
    fn horizon(&self) -> u32;
    fn predict(&self, features: &FeatureVector) -> Result<SignalOutput>;
}

/// Logistic model over the fixed feature order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearPredictor {
    pub horizon: u32,
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearPredictor {
    pub fn new(horizon: u32, weights: [f64; NUM_FEATURES], bias: f64) -> Self {
        Self {
            horizon,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            weights: weights.to_vec(),
            bias,
        }
    }

    pub fn artifact_path(dir: &Path, symbol: &str, horizon: u32) -> PathBuf {
        dir.join(format!("signal_{}_h{}.json", symbol.to_uppercase(), horizon))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read model {}", path.display()))?;
        let model: LinearPredictor = serde_json::from_str(&raw)
            .with_context(|| format!("parse model {}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.feature_names.len() != NUM_FEATURES
            || self.feature_names.iter().zip(FEATURE_NAMES.iter()).any(|(a, b)| a != b)
        {
            bail!(
                "feature order mismatch: expected {:?}, got {:?}",
                FEATURE_NAMES,
                self.feature_names
            );
        }
        if self.weights.len() != NUM_FEATURES {
            bail!("expected {} weights, got {}", NUM_FEATURES, self.weights.len());
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            bail!("non-finite model parameters");
        }
        Ok(())
    }
}

impl HorizonPredictor for LinearPredictor {
    fn horizon(&self) -> u32 {
        self.horizon
    }

    fn predict(&self, features: &FeatureVector) -> Result<SignalOutput> {
        let z = self.bias
            + self
                .weights
                .iter()
                .zip(features.as_array().iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        let p_up = 1.0 / (1.0 + (-z).exp());
        SignalOutput::from_probs(1.0 - p_up, p_up)
            .ok_or_else(|| anyhow!("h{} produced invalid probabilities (z={})", self.horizon, z))
    }
}

/// Explicitly owned set of predictors, keyed by horizon.
#[derive(Default)]
pub struct PredictorRegistry {
    predictors: BTreeMap<u32, Box<dyn HorizonPredictor>>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, predictor: Box<dyn HorizonPredictor>) {
        self.predictors.insert(predictor.horizon(), predictor);
    }

    pub fn with(mut self, predictor: Box<dyn HorizonPredictor>) -> Self {
        self.insert(predictor);
        self
    }

    /// Load one artifact per horizon. Missing or unreadable artifacts are
    /// skipped with a warning.
    pub fn load(dir: &Path, symbol: &str, horizons: &[u32]) -> Self {
        let mut registry = Self::new();
        for &h in horizons {
            let path = LinearPredictor::artifact_path(dir, symbol, h);
            match LinearPredictor::load(&path) {
                Ok(model) => registry.insert(Box::new(model)),
                Err(err) => log(
                    Level::Warn,
                    Domain::System,
                    "predictor_missing",
                    obj(&[
                        ("symbol", v_str(symbol)),
                        ("horizon", json!(h)),
                        ("error", v_str(&format!("{:#}", err))),
                    ]),
                ),
            }
        }
        registry
    }

    /// Fails when no horizon is available; the pipeline cannot decide anything.
    pub fn require_usable(self) -> Result<Self> {
        if self.predictors.is_empty() {
            bail!("no usable horizon predictors loaded");
        }
        Ok(self)
    }

    pub fn horizons(&self) -> Vec<u32> {
        self.predictors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &dyn HorizonPredictor)> {
        self.predictors.iter().map(|(h, p)| (*h, p.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn features() -> FeatureVector {
        FeatureVector::new([0.001, 0.001, 0.0, 0.001, 0.0, 0.001, 0.0, 0.001, 1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn test_zero_model_is_neutral() {
        let m = LinearPredictor::new(1, [0.0; NUM_FEATURES], 0.0);
        let out = m.predict(&features()).unwrap();
        assert_eq!(out.p_up, 0.5);
        assert_eq!(out.direction, 0);
    }

    #[test]
    fn test_positive_bias_leans_up() {
        let m = LinearPredictor::new(3, [0.0; NUM_FEATURES], 1.0);
        let out = m.predict(&features()).unwrap();
        assert!(out.p_up > 0.7);
        assert!((out.p_up + out.p_down - 1.0).abs() < 1e-12);
        assert_eq!(out.direction, 1);
    }

    #[test]
    fn test_registry_skips_missing_artifacts() {
        let dir = TempDir::new().unwrap();
        let m = LinearPredictor::new(3, [0.0; NUM_FEATURES], 0.2);
        m.save(&LinearPredictor::artifact_path(dir.path(), "btcusdt", 3)).unwrap();

        let reg = PredictorRegistry::load(dir.path(), "BTCUSDT", &[1, 3, 10]);
        assert_eq!(reg.horizons(), vec![3]);
        assert!(reg.require_usable().is_ok());
    }

    #[test]
    fn test_empty_registry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let reg = PredictorRegistry::load(dir.path(), "BTCUSDT", &[1, 3, 10]);
        assert!(reg.is_empty());
        assert!(reg.require_usable().is_err());
    }

    #[test]
    fn test_rejects_reordered_features() {
        let dir = TempDir::new().unwrap();
        let mut m = LinearPredictor::new(1, [0.0; NUM_FEATURES], 0.0);
        m.feature_names.swap(0, 1);
        let path = dir.path().join("bad.json");
        m.save(&path).unwrap();
        assert!(LinearPredictor::load(&path).is_err());
    }
}
