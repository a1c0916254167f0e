use anyhow::Result;
use async_trait::async_trait;

use super::{MarketContext, RiskEvaluator, RiskVerdict};
use crate::config::RiskConfig;
use crate::features::FeatureVector;
use crate::signals::SignalOutput;

/// Deterministic local evaluator. Pure function of its inputs and limits.
#[derive(Debug, Clone)]
pub struct HeuristicEvaluator {
    pub min_required_edge: f64,
    pub max_drawdown: f64,
    pub max_exposure: f64,
    pub shock_threshold: f64,
    pub volatility_threshold: f64,
}

impl HeuristicEvaluator {
    pub fn from_config(cfg: &RiskConfig) -> Self {
        Self {
            min_required_edge: cfg.min_required_edge,
            max_drawdown: cfg.max_drawdown,
            max_exposure: cfg.max_exposure,
            shock_threshold: cfg.shock_threshold,
            volatility_threshold: cfg.volatility_threshold,
        }
    }

    pub fn assess(
        &self,
        features: &FeatureVector,
        signal: &SignalOutput,
        ctx: &MarketContext,
    ) -> RiskVerdict {
        let edge = signal.edge;
        let vol = features.ret_std_10().abs();

        let raw = 0.5 + 5.0 * edge - 5.0 * ctx.drawdown - 2.0 * ctx.shock - 2.0 * vol;
        let risk_score = (raw.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0;

        let checks = [
            (edge >= self.min_required_edge, "edge too small"),
            (ctx.drawdown <= self.max_drawdown, "drawdown limit exceeded"),
            (ctx.exposure <= self.max_exposure, "exposure limit exceeded"),
            (ctx.shock < self.shock_threshold, "price shock detected"),
            (vol < self.volatility_threshold, "elevated volatility"),
        ];
        let violations: Vec<&str> = checks.iter().filter(|(ok, _)| !ok).map(|(_, why)| *why).collect();

        RiskVerdict {
            approve: violations.is_empty(),
            risk_score,
            reason: if violations.is_empty() {
                "approved".to_string()
            } else {
                violations.join("; ")
            },
        }
    }
}

#[async_trait]
impl RiskEvaluator for HeuristicEvaluator {
    async fn evaluate(
        &self,
        features: &FeatureVector,
        signal: &SignalOutput,
        ctx: &MarketContext,
    ) -> Result<RiskVerdict> {
        Ok(self.assess(features, signal, ctx))
    }
}
