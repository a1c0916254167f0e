use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::{MockFeed, Side, Tick};
use crate::logging::log_dropped_tick;

/// Quantity assumed when a row has no qty column.
pub const DEFAULT_QTY: f64 = 0.001;

pub const HEADER: &str = "timestamp,price,qty,side";

/// `timestamp,price[,qty[,side]]`
pub fn parse_tick_line(line: &str) -> Result<Tick> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(anyhow!("expected 2+ columns, got {}", parts.len()));
    }
    let timestamp: u64 = parts[0].parse().context("timestamp")?;
    let price: f64 = parts[1].parse().context("price")?;
    let quantity: f64 = match parts.get(2) {
        Some(q) if !q.is_empty() => q.parse().context("qty")?,
        _ => DEFAULT_QTY,
    };
    let side = parts.get(3).and_then(|s| Side::parse(s));
    Tick::new(timestamp, price, quantity, side).ok_or_else(|| anyhow!("out of range: {}", line))
}

/// Load a tick file, skipping the header, comments and unparseable rows.
/// Rows are returned sorted by timestamp; equal timestamps keep file order.
pub fn load_ticks(path: &Path, symbol: &str) -> Result<Vec<Tick>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut ticks = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if n == 0 && trimmed.starts_with("timestamp") {
            continue;
        }
        match parse_tick_line(trimmed) {
            Ok(t) => ticks.push(t),
            Err(err) => log_dropped_tick(symbol, &format!("line {}: {:#}", n + 1, err)),
        }
    }
    ticks.sort_by_key(|t| t.timestamp);
    Ok(ticks)
}

/// Write `count` mock ticks as CSV. Returns the number of rows written.
pub fn write_synthetic(path: &Path, symbol: &str, count: usize, seed: u64, start_ms: u64) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", HEADER)?;
    let mut written = 0;
    for tick in MockFeed::new(symbol, seed, start_ms).filter_map(|e| e.to_tick()).take(count) {
        let side = tick.side.map(|s| s.as_str()).unwrap_or("");
        writeln!(out, "{},{:.2},{:.6},{}", tick.timestamp, tick.price, tick.quantity, side)?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_tick_line_variants() {
        let full = parse_tick_line("1000, 45000.5, 0.25, sell").unwrap();
        assert_eq!(full.timestamp, 1000);
        assert_eq!(full.quantity, 0.25);
        assert_eq!(full.side, Some(Side::Sell));

        let bare = parse_tick_line("1001,45001").unwrap();
        assert_eq!(bare.quantity, DEFAULT_QTY);
        assert_eq!(bare.side, None);

        assert!(parse_tick_line("1002").is_err());
        assert!(parse_tick_line("abc,1").is_err());
        assert!(parse_tick_line("1003,0,1").is_err());
    }

    #[test]
    fn test_load_ticks_skips_bad_rows_and_sorts() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "{}", HEADER).unwrap();
        writeln!(f, "3000,101,1,buy").unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "1000,100,1,sell").unwrap();
        writeln!(f, "oops,1,1,buy").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "2000,nan,1,buy").unwrap();
        writeln!(f, "2000,100.5,1,buy").unwrap();

        let ticks = load_ticks(f.path(), "TEST").unwrap();
        let ts: Vec<u64> = ticks.iter().map(|t| t.timestamp).collect();
        assert_eq!(ts, vec![1000, 2000, 3000]);
    }

    #[test]
    fn test_synthetic_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("BTCUSDT_ticks.csv");
        let n = write_synthetic(&path, "BTCUSDT", 120, 11, 1_700_000_000_000).unwrap();
        assert_eq!(n, 120);
        let ticks = load_ticks(&path, "BTCUSDT").unwrap();
        assert_eq!(ticks.len(), 120);
        assert!(ticks.iter().all(|t| t.side.is_some()));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_ticks(Path::new("/definitely/not/here.csv"), "X").is_err());
    }
}
