//! Risk gate: a cached, rate-limited approve/reject oracle.
//!
//! The gate owns caching, rate limiting and request collapsing. The actual
//! judgement comes from a pluggable [`RiskEvaluator`]: the local
//! [`HeuristicEvaluator`] by default, or [`HttpRiskEvaluator`] for a remote
//! service. Whatever the evaluator does, the gate always returns a verdict.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep_until, Instant};

use crate::config::{EvaluatorKind, RiskConfig};
use crate::features::FeatureVector;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::signals::SignalOutput;

mod heuristic;
mod remote;

pub use heuristic::HeuristicEvaluator;
pub use remote::HttpRiskEvaluator;

/// Decimal places kept per feature when fingerprinting.
pub const FINGERPRINT_DECIMALS: i32 = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Fraction of peak equity lost, in [0, 1].
    pub drawdown: f64,
    /// Absolute open position size.
    pub exposure: f64,
    /// Magnitude of the latest single-tick return.
    pub shock: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub approve: bool,
    pub risk_score: f64,
    pub reason: String,
}

impl RiskVerdict {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self { approve: false, risk_score: 0.0, reason: reason.into() }
    }

    fn validate(self) -> Result<Self> {
        if !self.risk_score.is_finite() || !(0.0..=1.0).contains(&self.risk_score) {
            bail!("risk_score out of range: {}", self.risk_score);
        }
        Ok(self)
    }
}

#[async_trait]
pub trait RiskEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        features: &FeatureVector,
        signal: &SignalOutput,
        ctx: &MarketContext,
    ) -> Result<RiskVerdict>;
}

/// Cache key: SHA-256 of the rounded features plus the signal direction.
pub fn fingerprint(features: &FeatureVector, direction: i8) -> String {
    let scale = 10f64.powi(FINGERPRINT_DECIMALS);
    // + 0.0 folds -0.0 into 0.0 so both serialize the same way
    let rounded: Vec<f64> = features
        .as_array()
        .iter()
        .map(|x| (x * scale).round() / scale + 0.0)
        .collect();
    let payload = serde_json::to_string(&rounded).unwrap_or_default();
    let digest = Sha256::digest(payload.as_bytes());
    format!("{}:{}", hex::encode(digest), direction)
}

fn malformed_input(signal: &SignalOutput, ctx: &MarketContext) -> Option<&'static str> {
    let finite = [signal.p_up, signal.p_down, signal.edge, ctx.drawdown, ctx.exposure, ctx.shock]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Some("malformed risk inputs: non-finite value");
    }
    if ctx.drawdown < 0.0 || ctx.exposure < 0.0 || ctx.shock < 0.0 {
        return Some("malformed risk inputs: negative context");
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Cache,
    Evaluated,
    /// Safe rejection produced by the gate itself; never cached.
    Fallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub hits: u64,
    pub evaluations: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Clone)]
struct CachedVerdict {
    verdict: RiskVerdict,
    inserted_at: Instant,
}

pub struct RiskGate {
    evaluator: Box<dyn RiskEvaluator>,
    ttl: Duration,
    min_interval: Duration,
    max_entries: usize,
    cache: Mutex<HashMap<String, CachedVerdict>>,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    last_eval: AsyncMutex<Option<Instant>>,
    hits: AtomicU64,
    evaluations: AtomicU64,
    fallbacks: AtomicU64,
}

impl RiskGate {
    pub fn new(evaluator: Box<dyn RiskEvaluator>, cfg: &RiskConfig) -> Self {
        Self {
            evaluator,
            ttl: cfg.cache_ttl,
            min_interval: cfg.min_interval,
            max_entries: cfg.max_cache_entries.max(1),
            cache: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            last_eval: AsyncMutex::new(None),
            hits: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Gate with the evaluator selected in `cfg`.
    pub fn from_config(cfg: &RiskConfig) -> Result<Self> {
        let evaluator: Box<dyn RiskEvaluator> = match (cfg.evaluator, &cfg.evaluator_url) {
            (EvaluatorKind::Http, Some(url)) => {
                Box::new(HttpRiskEvaluator::new(url.clone(), cfg.http_timeout)?)
            }
            (EvaluatorKind::Http, None) => bail!("http risk evaluator needs RISK_EVALUATOR_URL"),
            (EvaluatorKind::Heuristic, _) => Box::new(HeuristicEvaluator::from_config(cfg)),
        };
        Ok(Self::new(evaluator, cfg))
    }

    pub async fn evaluate(
        &self,
        features: &FeatureVector,
        signal: &SignalOutput,
        ctx: &MarketContext,
    ) -> RiskVerdict {
        self.evaluate_with_source(features, signal, ctx).await.0
    }

    pub async fn evaluate_with_source(
        &self,
        features: &FeatureVector,
        signal: &SignalOutput,
        ctx: &MarketContext,
    ) -> (RiskVerdict, VerdictSource) {
        if let Some(reason) = malformed_input(signal, ctx) {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            return (RiskVerdict::reject(reason), VerdictSource::Fallback);
        }

        let key = fingerprint(features, signal.direction);
        if let Some(v) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (v, VerdictSource::Cache);
        }

        // One evaluation per key at a time; later arrivals find the cache warm.
        let claim = self.claim(&key);
        let _turn = claim.turn().await;
        if let Some(v) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (v, VerdictSource::Cache);
        }

        self.wait_for_budget().await;
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let result = self
            .evaluator
            .evaluate(features, signal, ctx)
            .await
            .and_then(RiskVerdict::validate);

        let out = match result {
            Ok(verdict) => {
                self.store(key.clone(), verdict.clone());
                (verdict, VerdictSource::Evaluated)
            }
            Err(err) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                log(
                    Level::Warn,
                    Domain::Risk,
                    "evaluator_failed",
                    obj(&[("error", v_str(&format!("{:#}", err)))]),
                );
                (RiskVerdict::reject("risk evaluator unavailable"), VerdictSource::Fallback)
            }
        };
        out
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            hits: self.hits.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedVerdict>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh entry or nothing; an expired entry is evicted on the way out.
    fn lookup(&self, key: &str) -> Option<RiskVerdict> {
        let mut cache = self.lock_cache();
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => Some(entry.verdict.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, verdict: RiskVerdict) {
        let now = Instant::now();
        let mut cache = self.lock_cache();
        cache.insert(key, CachedVerdict { verdict, inserted_at: now });
        if cache.len() > self.max_entries {
            let ttl = self.ttl;
            cache.retain(|_, e| now.duration_since(e.inserted_at) <= ttl);
        }
    }

    fn claim<'a>(&'a self, key: &str) -> SlotClaim<'a> {
        let slot = self
            .lock_inflight()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        SlotClaim { gate: self, key: key.to_string(), slot: Some(slot) }
    }

    /// Suspend until `min_interval` has passed since the previous evaluation.
    async fn wait_for_budget(&self) {
        let mut last = self.last_eval.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if Instant::now() < ready_at {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Share of a per-key in-flight slot. The last holder to let go removes the
/// slot, whether the evaluation finished, hit the cache or was cancelled.
struct SlotClaim<'a> {
    gate: &'a RiskGate,
    key: String,
    slot: Option<Arc<AsyncMutex<()>>>,
}

impl SlotClaim<'_> {
    async fn turn(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        }
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        // Clones and releases both happen under the inflight lock, so the
        // strong count is exact here.
        let mut inflight = self.gate.lock_inflight();
        if let Some(slot) = self.slot.take() {
            let last = Arc::strong_count(&slot) == 2
                && inflight.get(&self.key).map_or(false, |s| Arc::ptr_eq(s, &slot));
            if last {
                inflight.remove(&self.key);
            }
            drop(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::NUM_FEATURES;
    use std::sync::atomic::AtomicUsize;

    fn features(seed: f64) -> FeatureVector {
        let mut v = [0.0; NUM_FEATURES];
        v[0] = seed;
        v[7] = 0.001;
        v[10] = 3.0;
        FeatureVector::new(v).unwrap()
    }

    fn signal(p_up: f64) -> SignalOutput {
        SignalOutput::from_probs(1.0 - p_up, p_up).unwrap()
    }

    fn cfg() -> RiskConfig {
        RiskConfig {
            cache_ttl: Duration::from_secs(5),
            min_interval: Duration::from_millis(50),
            ..RiskConfig::default()
        }
    }

    /// Counts calls, sleeps to widen race windows.
    struct Counting {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl RiskEvaluator for Counting {
        async fn evaluate(
            &self,
            _: &FeatureVector,
            _: &SignalOutput,
            _: &MarketContext,
        ) -> Result<RiskVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(RiskVerdict { approve: true, risk_score: 0.7, reason: "approved".into() })
        }
    }

    struct Failing;

    #[async_trait]
    impl RiskEvaluator for Failing {
        async fn evaluate(
            &self,
            _: &FeatureVector,
            _: &SignalOutput,
            _: &MarketContext,
        ) -> Result<RiskVerdict> {
            bail!("service down")
        }
    }

    #[test]
    fn test_fingerprint_rounds_to_six_places() {
        let a = fingerprint(&features(0.0012341), 1);
        let b = fingerprint(&features(0.0012344), 1);
        let c = fingerprint(&features(0.0012346), 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, fingerprint(&features(0.0012341), -1));
        assert!(a.ends_with(":1"));
    }

    #[test]
    fn test_fingerprint_negative_zero() {
        assert_eq!(fingerprint(&features(-0.0), 0), fingerprint(&features(0.0), 0));
        assert_eq!(fingerprint(&features(-1e-9), 0), fingerprint(&features(0.0), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_wait_and_evaluator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = RiskGate::new(Box::new(Counting { calls: calls.clone(), delay: Duration::ZERO }), &cfg());
        let f = features(0.001);
        let s = signal(0.6);
        let ctx = MarketContext::default();

        let (first, src1) = gate.evaluate_with_source(&f, &s, &ctx).await;
        let start = Instant::now();
        let (second, src2) = gate.evaluate_with_source(&f, &s, &ctx).await;

        assert_eq!(src1, VerdictSource::Evaluated);
        assert_eq!(src2, VerdictSource::Cache);
        assert_eq!(first, second);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_misses_are_rate_limited() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = RiskGate::new(Box::new(Counting { calls: calls.clone(), delay: Duration::ZERO }), &cfg());
        let s = signal(0.6);
        let ctx = MarketContext::default();

        let start = Instant::now();
        gate.evaluate(&features(0.001), &s, &ctx).await;
        gate.evaluate(&features(0.002), &s, &ctx).await;
        gate.evaluate(&features(0.003), &s, &ctx).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_reevaluated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = RiskGate::new(Box::new(Counting { calls: calls.clone(), delay: Duration::ZERO }), &cfg());
        let f = features(0.001);
        let s = signal(0.6);
        let ctx = MarketContext::default();

        gate.evaluate(&f, &s, &ctx).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        let (_, src) = gate.evaluate_with_source(&f, &s, &ctx).await;

        assert_eq!(src, VerdictSource::Evaluated);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(gate.cache_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_same_key_collapses() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(RiskGate::new(
            Box::new(Counting { calls: calls.clone(), delay: Duration::from_millis(20) }),
            &cfg(),
        ));
        let f = features(0.001);
        let s = signal(0.6);
        let ctx = MarketContext::default();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.evaluate(&f, &s, &ctx).await }));
        }
        for h in handles {
            assert!(h.await.unwrap().approve);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gate.stats().hits, 7);
        assert!(gate.lock_inflight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_evaluation_releases_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = RiskGate::new(
            Box::new(Counting { calls: calls.clone(), delay: Duration::from_millis(100) }),
            &cfg(),
        );
        let f = features(0.001);
        let s = signal(0.6);
        let ctx = MarketContext::default();

        let cut = tokio::time::timeout(Duration::from_millis(10), gate.evaluate(&f, &s, &ctx)).await;
        assert!(cut.is_err());
        assert!(gate.lock_inflight().is_empty());
        assert_eq!(gate.cache_len(), 0);

        let (v, src) = gate.evaluate_with_source(&f, &s, &ctx).await;
        assert!(v.approve);
        assert_eq!(src, VerdictSource::Evaluated);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(gate.lock_inflight().is_empty());
    }

    #[test]
    fn test_http_evaluator_without_url_fails() {
        let cfg = RiskConfig { evaluator: EvaluatorKind::Http, evaluator_url: None, ..cfg() };
        assert!(RiskGate::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_evaluator_failure_rejects_without_caching() {
        let gate = RiskGate::new(Box::new(Failing), &cfg());
        let (v, src) = gate
            .evaluate_with_source(&features(0.001), &signal(0.7), &MarketContext::default())
            .await;
        assert!(!v.approve);
        assert_eq!(src, VerdictSource::Fallback);
        assert_eq!(gate.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_context_rejects() {
        let gate = RiskGate::from_config(&cfg()).unwrap();
        let ctx = MarketContext { drawdown: f64::NAN, exposure: 0.0, shock: 0.0 };
        let v = gate.evaluate(&features(0.001), &signal(0.7), &ctx).await;
        assert!(!v.approve);
        assert!(v.reason.contains("malformed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_sweeps_expired_entries_past_bound() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cfg = RiskConfig { max_cache_entries: 2, min_interval: Duration::ZERO, ..cfg() };
        let gate = RiskGate::new(Box::new(Counting { calls, delay: Duration::ZERO }), &cfg);
        let s = signal(0.6);
        let ctx = MarketContext::default();

        gate.evaluate(&features(0.001), &s, &ctx).await;
        gate.evaluate(&features(0.002), &s, &ctx).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        gate.evaluate(&features(0.003), &s, &ctx).await;

        assert_eq!(gate.cache_len(), 1);
    }
}
