//! Write a synthetic tick CSV from the mock feed.
//!
//! Usage: synth_ticks [path] [count]
//! WRITE_MODELS=1 also writes a momentum model per configured horizon into
//! MODEL_DIR so the paper loop and the offline replay can start.

use anyhow::Result;
use std::path::{Path, PathBuf};

use scalpfx::config::Config;
use scalpfx::features::{idx, NUM_FEATURES};
use scalpfx::feed::csv::write_synthetic;
use scalpfx::logging::ts_epoch_ms;
use scalpfx::predictor::LinearPredictor;

/// Trend-following weights; longer horizons lean on longer means.
fn momentum_weights(horizon: u32) -> [f64; NUM_FEATURES] {
    let mut w = [0.0; NUM_FEATURES];
    let long = (horizon as f64).min(10.0) / 10.0;
    w[idx::RET_1] = 300.0 * (1.0 - long);
    w[idx::RET_MEAN_3] = 600.0;
    w[idx::RET_MEAN_5] = 400.0 + 200.0 * long;
    w[idx::RET_MEAN_10] = 200.0 + 400.0 * long;
    w
}

fn main() -> Result<()> {
    let cfg = Config::from_env();
    let symbol = std::env::var("SYMBOL")
        .ok()
        .or_else(|| cfg.symbols.first().cloned())
        .unwrap_or_else(|| "BTCUSDT".to_string())
        .to_uppercase();
    let mut args = std::env::args().skip(1);
    let path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("data/offline/{}_ticks.csv", symbol)));
    let count: usize = args.next().and_then(|v| v.parse().ok()).unwrap_or(5_000);
    let seed: u64 = std::env::var("FEED_SEED").ok().and_then(|v| v.parse().ok()).unwrap_or(42);

    let written = write_synthetic(&path, &symbol, count, seed, ts_epoch_ms())?;
    eprintln!("wrote {} ticks to {}", written, path.display());

    if std::env::var("WRITE_MODELS").as_deref() == Ok("1") {
        for &h in &cfg.signal.horizons {
            let model_path = LinearPredictor::artifact_path(Path::new(&cfg.model_dir), &symbol, h);
            LinearPredictor::new(h, momentum_weights(h), 0.0).save(&model_path)?;
            eprintln!("wrote model {}", model_path.display());
        }
    }
    Ok(())
}
