//! Replay a tick CSV through one symbol pipeline and print the session report.
//!
//! Usage: offline [ticks.csv]
//! Defaults to data/offline/{SYMBOL}_ticks.csv. Simulated latency is skipped.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use scalpfx::config::Config;
use scalpfx::feed::csv::load_ticks;
use scalpfx::logging::ProfileScope;
use scalpfx::pipeline::{SymbolPipeline, TickOutcome};
use scalpfx::predictor::PredictorRegistry;

fn outcome_label(outcome: &TickOutcome) -> &'static str {
    match outcome {
        TickOutcome::NotReady => "not_ready",
        TickOutcome::OutOfOrder => "out_of_order",
        TickOutcome::Blocked(reason) => reason.as_str(),
        TickOutcome::NoSignal => "no_signal",
        TickOutcome::Decided(d) => d.action.as_str(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cfg = Config::from_env();
    cfg.exec.latency_min_ms = 0;
    cfg.exec.latency_max_ms = 0;
    let symbol = std::env::var("SYMBOL")
        .ok()
        .or_else(|| cfg.symbols.first().cloned())
        .unwrap_or_else(|| "BTCUSDT".to_string())
        .to_uppercase();
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("data/offline/{}_ticks.csv", symbol)));

    let ticks = load_ticks(&path, &symbol)?;
    if ticks.is_empty() {
        bail!("no ticks parsed from {}", path.display());
    }
    let registry = PredictorRegistry::load(Path::new(&cfg.model_dir), &symbol, &cfg.signal.horizons)
        .require_usable()
        .with_context(|| format!("{}: models in {}", symbol, cfg.model_dir))?;

    let mut pipeline = SymbolPipeline::new(&symbol, &cfg, Arc::new(registry))?;
    let mut outcomes: BTreeMap<&'static str, u64> = BTreeMap::new();
    {
        let _scope = ProfileScope::new("offline_replay");
        for tick in ticks {
            let outcome = pipeline.on_tick(tick).await;
            *outcomes.entry(outcome_label(&outcome)).or_default() += 1;
        }
    }

    let report = pipeline.finish();
    eprintln!("outcomes: {:?}", outcomes);
    if let Some(stats) = pipeline.gate_stats() {
        eprintln!(
            "risk gate: evaluations={} cache_hits={} fallbacks={}",
            stats.evaluations, stats.hits, stats.fallbacks
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
