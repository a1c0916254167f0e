//! Structured JSON-lines logging for the tick pipeline.
//!
//! Every record carries a run id, a monotonically increasing sequence number
//! and a domain so that a session can be filtered and replayed from stdout or
//! from the optional per-run files under `LOG_DIR`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,   // Ticks, feed adapters
    Signal,   // Block filter, ensemble
    Risk,     // Risk gate verdicts
    Decision, // State machine output
    Exec,     // Simulated fills, ledger
    System,   // Startup, shutdown, summaries
    Profile,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Signal => "signal",
            Domain::Risk => "risk",
            Domain::Decision => "decision",
            Domain::Exec => "exec",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sinks: Option<RunSinks>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sinks = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_sinks(PathBuf::from(base).join(&run_id)));
        RunContext { run_id, sinks }
    })
}

/// Run id of this process; the first call also opens the `LOG_DIR` sinks.
pub fn run_id() -> &'static str {
    &ensure_run_context().run_id
}

fn open_sinks(run_dir: PathBuf) -> Option<RunSinks> {
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
    }
    let open = |name: &str| match File::create(run_dir.join(name)) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", name, err);
            None
        }
    };
    Some(RunSinks {
        events: open("events.jsonl")?,
        trace: open("trace.jsonl")?,
    })
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["symbol", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if let Some(sinks) = &ctx.sinks {
        match level {
            Level::Trace | Level::Debug => write_line(&sinks.trace, &line),
            _ => write_line(&sinks.events, &line),
        }
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_dropped_tick(symbol: &str, reason: &str) {
    log(
        Level::Debug,
        Domain::Market,
        "tick_dropped",
        obj(&[("symbol", v_str(symbol)), ("reason", v_str(reason))]),
    );
}

pub fn log_block(symbol: &str, ts: u64, reason: &str) {
    log(
        Level::Debug,
        Domain::Signal,
        "blocked",
        obj(&[
            ("symbol", v_str(symbol)),
            ("tick_ts", json!(ts)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_predictor_failure(horizon: u32, err: &str) {
    log(
        Level::Warn,
        Domain::Signal,
        "predictor_failed",
        obj(&[("horizon", json!(horizon)), ("error", v_str(err))]),
    );
}

pub fn log_risk_verdict(symbol: &str, approve: bool, risk_score: f64, reason: &str, cached: bool) {
    log(
        Level::Debug,
        Domain::Risk,
        "verdict",
        obj(&[
            ("symbol", v_str(symbol)),
            ("approve", json!(approve)),
            ("risk_score", v_num(risk_score)),
            ("reason", v_str(reason)),
            ("cached", json!(cached)),
        ]),
    );
}

pub fn log_decision(symbol: &str, action: &str, size: f64, meta_edge: f64, price: f64) {
    log(
        Level::Info,
        Domain::Decision,
        "decision",
        obj(&[
            ("symbol", v_str(symbol)),
            ("action", v_str(action)),
            ("size", v_num(size)),
            ("meta_edge", v_num(meta_edge)),
            ("price", v_num(price)),
        ]),
    );
}

pub fn log_trade(symbol: &str, action: &str, price: f64, size: f64, fee: f64, pnl: f64) {
    log(
        Level::Info,
        Domain::Exec,
        "trade",
        obj(&[
            ("symbol", v_str(symbol)),
            ("action", v_str(action)),
            ("price", v_num(price)),
            ("size", v_num(size)),
            ("fee", v_num(fee)),
            ("pnl", v_num(pnl)),
        ]),
    );
}

pub fn log_stats(symbol: &str, position: f64, trades: usize, pnl: f64, meta_edge: f64) {
    log(
        Level::Info,
        Domain::System,
        "stats",
        obj(&[
            ("symbol", v_str(symbol)),
            ("position", v_num(position)),
            ("trades", json!(trades)),
            ("pnl", v_num(pnl)),
            ("meta_edge", v_num(meta_edge)),
        ]),
    );
}

/// Session summary on shutdown
#[allow(clippy::too_many_arguments)]
pub fn log_session_summary(
    symbol: &str,
    ticks_seen: u64,
    ticks_used: u64,
    blocked: u64,
    realized_pnl: f64,
    unrealized_pnl: f64,
    trades: usize,
    max_drawdown: f64,
) {
    log(
        Level::Info,
        Domain::System,
        "session_summary",
        obj(&[
            ("symbol", v_str(symbol)),
            ("ticks_seen", json!(ticks_seen)),
            ("ticks_used", json!(ticks_used)),
            ("blocked", json!(blocked)),
            ("realized_pnl", v_num(realized_pnl)),
            ("unrealized_pnl", v_num(unrealized_pnl)),
            ("trades", json!(trades)),
            ("max_drawdown", v_num(max_drawdown)),
        ]),
    );
}

// =============================================================================
// Field helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits elapsed time for a labelled section on drop (trace level).
pub struct ProfileScope {
    label: &'static str,
    symbol: Option<String>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self { label, symbol: None, started: Instant::now() }
    }

    pub fn for_symbol(label: &'static str, symbol: &str) -> Self {
        Self { label, symbol: Some(symbol.to_string()), started: Instant::now() }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = obj(&[("label", v_str(self.label)), ("elapsed_ms", v_num(elapsed_ms))]);
        if let Some(symbol) = &self.symbol {
            fields.insert("symbol".to_string(), v_str(symbol));
        }
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================
