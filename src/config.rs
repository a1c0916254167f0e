//! Runtime settings, read once from the environment at construction time.
//!
//! Every option falls back to a default when the variable is unset or does
//! not parse. Each section also implements `Default` so components can be
//! built without touching the environment.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

/// Parse `"1:0.5,3:0.3,10:0.2"` into a horizon → weight map.
pub fn parse_horizon_weights(raw: &str) -> Option<BTreeMap<u32, f64>> {
    let mut out = BTreeMap::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (h, w) = part.split_once(':')?;
        let h: u32 = h.trim().parse().ok()?;
        let w: f64 = w.trim().parse().ok()?;
        if !w.is_finite() || w < 0.0 {
            return None;
        }
        out.insert(h, w);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

// =============================================================================
// Signal combiner + block filter
// =============================================================================

#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub horizons: Vec<u32>,
    pub weights: BTreeMap<u32, f64>,
    /// Block when |ret_std_10| falls below this.
    pub min_volatility: f64,
    /// Block when |ret_1| exceeds this.
    pub shock_threshold: f64,
    /// Block when vol_sum_10 falls below this.
    pub min_activity: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            horizons: vec![1, 3, 10],
            weights: BTreeMap::from([(1, 0.5), (3, 0.3), (10, 0.2)]),
            min_volatility: 1e-5,
            shock_threshold: 0.01,
            min_activity: 1e-6,
        }
    }
}

impl SignalConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let weights = std::env::var("HORIZON_WEIGHTS")
            .ok()
            .and_then(|v| parse_horizon_weights(&v))
            .unwrap_or(d.weights);
        Self {
            horizons: weights.keys().copied().collect(),
            weights,
            min_volatility: env_or("BLOCK_MIN_VOL", d.min_volatility),
            shock_threshold: env_or("BLOCK_SHOCK", d.shock_threshold),
            min_activity: env_or("BLOCK_MIN_ACTIVITY", d.min_activity),
        }
    }
}

// =============================================================================
// Risk gate
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorKind {
    Heuristic,
    Http,
}

impl EvaluatorKind {
    /// `http` selects the remote evaluator even without a URL, so the gate
    /// refuses to start instead of quietly running the heuristic.
    pub fn from_setting(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("http") => EvaluatorKind::Http,
            _ => EvaluatorKind::Heuristic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub enabled: bool,
    pub min_required_edge: f64,
    pub max_drawdown: f64,
    pub max_exposure: f64,
    pub shock_threshold: f64,
    pub volatility_threshold: f64,
    pub cache_ttl: Duration,
    pub min_interval: Duration,
    /// Expired entries are swept once the cache grows past this many keys.
    pub max_cache_entries: usize,
    pub evaluator: EvaluatorKind,
    pub evaluator_url: Option<String>,
    pub http_timeout: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_required_edge: 0.015,
            max_drawdown: 0.03,
            max_exposure: 2.0,
            shock_threshold: 0.05,
            volatility_threshold: 0.05,
            cache_ttl: Duration::from_secs(5),
            min_interval: Duration::from_millis(50),
            max_cache_entries: 4096,
            evaluator: EvaluatorKind::Heuristic,
            evaluator_url: None,
            http_timeout: Duration::from_millis(2000),
        }
    }
}

impl RiskConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let evaluator_url = std::env::var("RISK_EVALUATOR_URL").ok();
        let evaluator = EvaluatorKind::from_setting(std::env::var("RISK_EVALUATOR").ok().as_deref());
        Self {
            enabled: env_flag("RISK_GATE", d.enabled),
            min_required_edge: env_or("RISK_MIN_EDGE", d.min_required_edge),
            max_drawdown: env_or("MAX_DAILY_DD", d.max_drawdown),
            max_exposure: env_or("MAX_EXPOSURE", d.max_exposure),
            shock_threshold: env_or("RISK_SHOCK_TH", d.shock_threshold),
            volatility_threshold: env_or("RISK_VOL_TH", d.volatility_threshold),
            cache_ttl: Duration::from_millis(env_or("RISK_CACHE_TTL_MS", 5_000)),
            min_interval: Duration::from_millis(env_or("RISK_MIN_INTERVAL_MS", 50)),
            max_cache_entries: env_or("RISK_CACHE_MAX", d.max_cache_entries),
            evaluator,
            evaluator_url,
            http_timeout: Duration::from_millis(env_or("RISK_HTTP_TIMEOUT_MS", 2_000)),
        }
    }
}

// =============================================================================
// Decision state machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingPolicy {
    /// Size from a fixed stop distance, attach stop-loss and take-profit.
    RiskBudget,
    /// Enter on probability thresholds, fixed size, no stops.
    ConfidenceThreshold,
}

impl FromStr for SizingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "risk_budget" | "risk" => Ok(SizingPolicy::RiskBudget),
            "confidence" | "confidence_threshold" => Ok(SizingPolicy::ConfidenceThreshold),
            other => Err(format!("unknown sizing policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub policy: SizingPolicy,
    pub balance: f64,
    pub edge_min: f64,
    pub min_confidence: f64,
    pub risk_fraction: f64,
    pub leverage: f64,
    pub fixed_stop_fraction: f64,
    pub reward_multiple: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            policy: SizingPolicy::RiskBudget,
            balance: 1000.0,
            edge_min: 0.02,
            min_confidence: 0.55,
            risk_fraction: 0.005,
            leverage: 5.0,
            fixed_stop_fraction: 0.005,
            reward_multiple: 1.5,
        }
    }
}

impl DecisionConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            policy: env_or("SIZING_POLICY", d.policy),
            balance: env_or("BALANCE", d.balance),
            edge_min: env_or("EDGE_MIN", d.edge_min),
            min_confidence: env_or("MIN_CONFIDENCE", d.min_confidence),
            risk_fraction: env_or("RISK_FRACTION", d.risk_fraction),
            leverage: env_or("LEVERAGE", d.leverage),
            fixed_stop_fraction: env_or("STOP_FRACTION", d.fixed_stop_fraction),
            reward_multiple: env_or("REWARD_MULTIPLE", d.reward_multiple),
        }
    }
}

// =============================================================================
// Execution simulator
// =============================================================================

#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub fee_bps: f64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self { fee_bps: 2.0, latency_min_ms: 2, latency_max_ms: 5 }
    }
}

impl ExecConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            fee_bps: env_or("FEE_BPS", d.fee_bps),
            latency_min_ms: env_or("LAT_MIN_MS", d.latency_min_ms),
            latency_max_ms: env_or("LAT_MAX_MS", d.latency_max_ms),
        }
    }

    /// No latency, no fees.
    pub fn instant() -> Self {
        Self { fee_bps: 0.0, latency_min_ms: 0, latency_max_ms: 0 }
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_bps.max(0.0) / 10_000.0
    }
}

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    pub model_dir: String,
    pub report_secs: u64,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    pub decision: DecisionConfig,
    pub exec: ExecConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            model_dir: "storage/models".to_string(),
            report_secs: 5,
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
            decision: DecisionConfig::default(),
            exec: ExecConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            symbols: env_list("SYMBOLS", &["BTCUSDT"]),
            model_dir: std::env::var("MODEL_DIR").unwrap_or_else(|_| "storage/models".to_string()),
            report_secs: env_or("REPORT_SECS", 5),
            signal: SignalConfig::from_env(),
            risk: RiskConfig::from_env(),
            decision: DecisionConfig::from_env(),
            exec: ExecConfig::from_env(),
        }
    }
}
