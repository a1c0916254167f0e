//! Per-symbol tick pipeline and the multi-symbol runner.
//!
//! One [`SymbolPipeline`] owns everything mutable for its symbol: feature
//! window, risk-gate cache, ledger and equity curve. The predictor registry
//! is the only shared piece and is read-only.

use anyhow::{anyhow, bail, Result};
use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::decision::{Action, Decision, DecisionEngine};
use crate::execution::{PaperTrader, Summary};
use crate::features::FeatureWindow;
use crate::feed::Tick;
use crate::logging::{
    log_block, log_decision, log_dropped_tick, log_risk_verdict, log_session_summary, log_stats,
    log_trade, ProfileScope,
};
use crate::metrics::EquityTracker;
use crate::predictor::PredictorRegistry;
use crate::risk::{GateStats, MarketContext, RiskGate, VerdictSource};
use crate::signals::{BlockReason, SignalCombiner, SignalOutput};

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Fewer than 11 ticks buffered, or the window produced a non-finite value.
    NotReady,
    /// Timestamp earlier than the previous tick; dropped.
    OutOfOrder,
    Blocked(BlockReason),
    /// No predictor produced a result.
    NoSignal,
    Decided(Decision),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub ticks_seen: u64,
    /// Ticks with a full feature window that passed the block filter.
    pub ticks_used: u64,
    pub out_of_order: u64,
    pub blocked: u64,
    pub no_signal: u64,
    /// Non-hold decisions the simulator finished applying.
    pub orders: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub symbol: String,
    pub counters: Counters,
    pub summary: Summary,
    pub max_drawdown: f64,
}

pub struct SymbolPipeline {
    symbol: String,
    window: FeatureWindow,
    combiner: SignalCombiner,
    gate: Option<RiskGate>,
    engine: DecisionEngine,
    trader: PaperTrader,
    equity: EquityTracker,
    last_ts: Option<u64>,
    last_meta_edge: f64,
    counters: Counters,
}

impl SymbolPipeline {
    /// Fails when the registry holds no predictors: such a symbol can never
    /// produce a signal.
    pub fn new(symbol: &str, cfg: &Config, registry: Arc<PredictorRegistry>) -> Result<Self> {
        if registry.is_empty() {
            bail!("{}: no usable predictors", symbol);
        }
        let gate = if cfg.risk.enabled { Some(RiskGate::from_config(&cfg.risk)?) } else { None };
        Ok(Self::with_gate(symbol, cfg, registry, gate))
    }

    /// Pipeline around a caller-built gate (or none, which approves everything).
    pub fn with_gate(
        symbol: &str,
        cfg: &Config,
        registry: Arc<PredictorRegistry>,
        gate: Option<RiskGate>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            window: FeatureWindow::new(),
            combiner: SignalCombiner::new(registry, cfg.signal.clone()),
            gate,
            engine: DecisionEngine::new(cfg.decision.clone()),
            trader: PaperTrader::new(&cfg.exec),
            equity: EquityTracker::new(cfg.decision.balance),
            last_ts: None,
            last_meta_edge: 0.0,
            counters: Counters::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn trader(&self) -> &PaperTrader {
        &self.trader
    }

    pub fn equity(&self) -> &EquityTracker {
        &self.equity
    }

    pub fn gate_stats(&self) -> Option<GateStats> {
        self.gate.as_ref().map(|g| g.stats())
    }

    pub async fn on_tick(&mut self, tick: Tick) -> TickOutcome {
        let _scope = ProfileScope::for_symbol("on_tick", &self.symbol);
        self.counters.ticks_seen += 1;

        if let Some(prev) = self.last_ts {
            if tick.timestamp < prev {
                self.counters.out_of_order += 1;
                log_dropped_tick(&self.symbol, &format!("out of order: {} < {}", tick.timestamp, prev));
                return TickOutcome::OutOfOrder;
            }
        }
        self.last_ts = Some(tick.timestamp);
        self.mark(tick.price);

        let Some(features) = self.window.add_tick(tick.timestamp, tick.price, tick.quantity).ready() else {
            return TickOutcome::NotReady;
        };

        if let Some(reason) = self.combiner.filter(&features) {
            self.counters.blocked += 1;
            log_block(&self.symbol, tick.timestamp, reason.as_str());
            return TickOutcome::Blocked(reason);
        }
        self.counters.ticks_used += 1;

        let ensemble = self.combiner.predict(&features);
        self.last_meta_edge = ensemble.meta_edge;
        if ensemble.is_empty() {
            self.counters.no_signal += 1;
            return TickOutcome::NoSignal;
        }
        let signal = SignalOutput::from_meta(&ensemble);

        let approved = match &self.gate {
            Some(gate) => {
                let ctx = MarketContext {
                    drawdown: self.equity.drawdown(),
                    exposure: self.trader.position().abs(),
                    shock: features.ret_1().abs(),
                };
                let (verdict, source) = gate.evaluate_with_source(&features, &signal, &ctx).await;
                log_risk_verdict(
                    &self.symbol,
                    verdict.approve,
                    verdict.risk_score,
                    &verdict.reason,
                    source == VerdictSource::Cache,
                );
                verdict.approve
            }
            None => true,
        };

        let decision = self.engine.decide(&signal, self.trader.position(), approved, tick.price);
        if decision.action != Action::Hold {
            log_decision(&self.symbol, decision.action.as_str(), decision.size, ensemble.meta_edge, tick.price);
            // Nothing below the await runs if the tick is dropped mid-latency.
            let fills = self.trader.process(&decision, tick.price, tick.timestamp).await;
            self.counters.orders += 1;
            for fill in &fills {
                log_trade(&self.symbol, fill.action.as_str(), fill.price, fill.size, fill.fee, fill.pnl);
            }
            self.mark(tick.price);
        }
        TickOutcome::Decided(decision)
    }

    fn mark(&mut self, price: f64) {
        self.equity.update(self.trader.realized_pnl(), self.trader.unrealized_at(price));
    }

    /// Periodic stats line.
    pub fn report(&self) {
        let s = self.trader.summary();
        log_stats(
            &self.symbol,
            s.position,
            s.trades,
            s.realized_pnl + s.unrealized_pnl,
            self.last_meta_edge,
        );
    }

    pub fn finish(&self) -> SessionReport {
        let summary = self.trader.summary();
        log_session_summary(
            &self.symbol,
            self.counters.ticks_seen,
            self.counters.ticks_used,
            self.counters.blocked,
            summary.realized_pnl,
            summary.unrealized_pnl,
            summary.trades,
            self.equity.max_drawdown(),
        );
        SessionReport {
            symbol: self.symbol.clone(),
            counters: self.counters,
            summary,
            max_drawdown: self.equity.max_drawdown(),
        }
    }
}

/// Limits for one [`run_symbols`] session.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub report_every: Duration,
    /// Stop each symbol after this many ticks.
    pub max_ticks: Option<u64>,
}

impl RunOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self { report_every: Duration::from_secs(cfg.report_secs.max(1)), max_ticks: None }
    }
}

/// Drive one pipeline from its stream until the stream ends, the tick limit
/// is hit or shutdown is signalled.
pub async fn run_pipeline<S>(
    mut pipeline: SymbolPipeline,
    mut ticks: S,
    opts: RunOptions,
    mut shutdown: watch::Receiver<bool>,
) -> SessionReport
where
    S: Stream<Item = Tick> + Unpin,
{
    let mut report = tokio::time::interval(opts.report_every);
    report.tick().await;
    // A dropped sender can no longer signal; stop polling it.
    let mut listening = true;
    loop {
        if *shutdown.borrow() {
            break;
        }
        if opts.max_ticks.map_or(false, |max| pipeline.counters().ticks_seen >= max) {
            break;
        }
        tokio::select! {
            changed = shutdown.changed(), if listening => {
                if changed.is_err() {
                    listening = false;
                }
            }
            _ = report.tick() => pipeline.report(),
            next = ticks.next() => match next {
                Some(tick) => {
                    pipeline.on_tick(tick).await;
                }
                None => break,
            },
        }
    }
    pipeline.finish()
}

/// One symbol's inputs for [`run_symbols`].
pub struct SymbolFeed<S> {
    pub symbol: String,
    pub registry: Arc<PredictorRegistry>,
    pub ticks: S,
}

/// Run one task per symbol. Pipelines are built up front so a bad
/// configuration fails before any task starts.
pub async fn run_symbols<S>(
    cfg: &Config,
    feeds: Vec<SymbolFeed<S>>,
    opts: RunOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<SessionReport>>
where
    S: Stream<Item = Tick> + Unpin + Send + 'static,
{
    let mut handles = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let pipeline = SymbolPipeline::new(&feed.symbol, cfg, feed.registry)?;
        handles.push(tokio::spawn(run_pipeline(pipeline, feed.ticks, opts.clone(), shutdown.clone())));
    }
    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.map_err(|e| anyhow!("symbol task failed: {}", e)))
        .collect()
}
