//! Paper-trading loop over the mock trade feed, one task per symbol.
//!
//! Models are read from `MODEL_DIR`; a symbol with no usable horizon model
//! aborts startup. Stops on Ctrl-C or after `MAX_TICKS` ticks per symbol.

use anyhow::{Context, Result};
use futures_util::{future, StreamExt};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use scalpfx::config::Config;
use scalpfx::feed::MockFeed;
use scalpfx::logging::{log, log_dropped_tick, obj, run_id, ts_epoch_ms, v_str, Domain, Level};
use scalpfx::pipeline::{run_symbols, RunOptions, SymbolFeed};
use scalpfx::predictor::PredictorRegistry;

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("symbols", json!(cfg.symbols)),
            ("horizons", json!(cfg.signal.horizons)),
            ("policy", json!(format!("{:?}", cfg.decision.policy))),
            ("risk_enabled", json!(cfg.risk.enabled)),
            ("model_dir", v_str(&cfg.model_dir)),
            ("run_id", v_str(run_id())),
        ]),
    );

    let start_ms = ts_epoch_ms();
    let seed_base: u64 = env_u64("FEED_SEED").unwrap_or(42);
    let gap_min = env_u64("FEED_GAP_MIN_MS").unwrap_or(10);
    let gap_max = env_u64("FEED_GAP_MAX_MS").unwrap_or(50);
    let mut feeds = Vec::with_capacity(cfg.symbols.len());
    for (i, symbol) in cfg.symbols.iter().enumerate() {
        let registry = PredictorRegistry::load(Path::new(&cfg.model_dir), symbol, &cfg.signal.horizons)
            .require_usable()
            .with_context(|| format!("{}: models in {}", symbol, cfg.model_dir))?;
        let sym = symbol.clone();
        let ticks = MockFeed::new(symbol, seed_base + i as u64, start_ms)
            .with_delay(gap_min, gap_max)
            .into_stream()
            .filter_map(move |event| {
                let tick = event.to_tick();
                if tick.is_none() {
                    log_dropped_tick(&sym, "malformed trade event");
                }
                future::ready(tick)
            })
            .boxed();
        feeds.push(SymbolFeed { symbol: symbol.clone(), registry: Arc::new(registry), ticks });
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log(Level::Info, Domain::System, "shutdown_requested", obj(&[]));
            let _ = stop_tx.send(true);
        }
    });

    let opts = RunOptions {
        max_ticks: env_u64("MAX_TICKS"),
        ..RunOptions::from_config(&cfg)
    };
    let reports = run_symbols(&cfg, feeds, opts, stop_rx).await?;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }
    Ok(())
}
