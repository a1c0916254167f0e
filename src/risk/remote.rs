use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use super::{MarketContext, RiskEvaluator, RiskVerdict};
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::signals::SignalOutput;

const INSTRUCTIONS: &str = "Act as the pre-trade risk check for a short-horizon crypto scalper. \
Reply with one JSON object {\"approve\": bool, \"risk_score\": number in [0,1], \"reason\": string}. \
Inputs: tick microstructure features, the combined signal (p_up, p_down, edge, direction) and the \
session context (drawdown, exposure, shock). Reject thin edges, pump-and-dump moves and any \
breach of drawdown or exposure limits. Answer the same way for the same inputs.";

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    instructions: &'a str,
    features: Map<String, Value>,
    signal: &'a SignalOutput,
    market_context: &'a MarketContext,
}

/// Evaluator backed by a remote JSON service. Non-deterministic and slow
/// compared to the heuristic; the gate's cache and rate limit absorb that.
pub struct HttpRiskEvaluator {
    client: reqwest::Client,
    url: String,
}

impl HttpRiskEvaluator {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build risk evaluator client")?;
        Ok(Self { client, url })
    }
}

fn named_features(features: &FeatureVector) -> Map<String, Value> {
    FEATURE_NAMES
        .iter()
        .zip(features.as_array().iter())
        .map(|(name, v)| (name.to_string(), Value::from(*v)))
        .collect()
}

#[async_trait]
impl RiskEvaluator for HttpRiskEvaluator {
    async fn evaluate(
        &self,
        features: &FeatureVector,
        signal: &SignalOutput,
        ctx: &MarketContext,
    ) -> Result<RiskVerdict> {
        let body = EvaluateRequest {
            instructions: INSTRUCTIONS,
            features: named_features(features),
            signal,
            market_context: ctx,
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("risk evaluator request")?
            .error_for_status()
            .context("risk evaluator status")?;
        let verdict: RiskVerdict = resp.json().await.context("risk evaluator response")?;
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::NUM_FEATURES;

    #[test]
    fn test_request_body_names_every_feature() {
        let mut raw = [0.0; NUM_FEATURES];
        raw[7] = 0.002;
        let f = FeatureVector::new(raw).unwrap();
        let signal = SignalOutput::from_probs(0.4, 0.6).unwrap();
        let ctx = MarketContext::default();
        let body = EvaluateRequest {
            instructions: INSTRUCTIONS,
            features: named_features(&f),
            signal: &signal,
            market_context: &ctx,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["features"].as_object().unwrap().len(), NUM_FEATURES);
        assert_eq!(json["features"]["ret_std_10"], 0.002);
        assert_eq!(json["signal"]["direction"], 1);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let eval = HttpRiskEvaluator::new("http://127.0.0.1:9/verdict".into(), Duration::from_millis(200))
            .unwrap();
        let f = FeatureVector::new([0.0; NUM_FEATURES]).unwrap();
        let signal = SignalOutput::from_probs(0.4, 0.6).unwrap();
        assert!(eval.evaluate(&f, &signal, &MarketContext::default()).await.is_err());
    }
}
