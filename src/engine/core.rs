//! The engine facade: one object owning the shared state and exposing
//! every operation an outer transport (HTTP, CLI, tests) would call.
//!
//! # Approach
//! 1. Construction wires the bounded history store into the stream
//!    connector and sets up the paper books
//! 2. `start` spawns the connector loop; everything else is callable
//!    with or without a live feed
//! 3. Read paths work on copied-out snapshots, so a slow backtest never
//!    blocks the feed

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::{find_preset, preset_names, StrategyConfig};
use crate::data::{ConnectionHealth, MarketHistory, StreamConnector};
use crate::domain::{
    Candle, OrderKind, OrderSide, PositionStatus, TieBreaker, TradeDirection, TradeTick,
};
use crate::engine::backtest::{run_backtest, BacktestConfig, BacktestReport};
use crate::engine::grid::{run_grid_search, GridParams, GridReport};
use crate::engine::signals::{
    breakout_signal, compute_spikes, range_levels, BreakoutEvaluation, BreakoutSignal,
    RangeLevels, SpikeRecord,
};
use crate::error::CoreError;
use crate::models::{
    portfolio_summary, size_by_risk, OrderLedger, PaperOrder, PaperPosition, PortfolioSummary,
    PositionLedger, PositionSizing, PositionView,
};

/// Spike rows returned by the spike scan when the caller does not say.
const DEFAULT_SPIKE_LIMIT: usize = 20;

/// Spike rows embedded in the combined signal summary.
const SUMMARY_SPIKE_LIMIT: usize = 10;

// ─── Request Parameters ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceOrderParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub qty: Option<f64>,
    pub price: Option<f64>,
    pub cancel_after: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenPositionParams {
    pub symbol: Option<String>,
    pub side: Option<String>,
    pub entry: Option<f64>,
    pub qty: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub leverage: Option<f64>,
}

/// Sizing inputs. No direction: the side of the stop implies it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SizeParams {
    pub entry: Option<f64>,
    pub sl: Option<f64>,
    pub balance: Option<f64>,
    pub risk_pct: Option<f64>,
    pub leverage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteParams {
    pub symbol: Option<String>,
    pub balance: Option<f64>,
    pub risk_pct: Option<f64>,
    pub leverage: Option<f64>,
    pub window: Option<usize>,
    pub multiplier: Option<f64>,
    pub lookback: Option<usize>,
}

/// Replay overrides; anything absent falls back to the live strategy
/// config or the replay defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BacktestParams {
    pub window: Option<usize>,
    pub multiplier: Option<f64>,
    pub lookback: Option<usize>,
    pub resolve_bars: Option<usize>,
    pub max_trades: Option<usize>,
    pub tie_breaker: Option<TieBreaker>,
    pub fee_bps: Option<f64>,
    pub slippage: Option<f64>,
}

impl BacktestParams {
    fn strategy_over(&self, base: StrategyConfig) -> StrategyConfig {
        StrategyConfig {
            window: self.window.unwrap_or(base.window),
            multiplier: self.multiplier.unwrap_or(base.multiplier),
            lookback: self.lookback.unwrap_or(base.lookback),
        }
    }

    fn backtest_config(&self) -> BacktestConfig {
        let defaults = BacktestConfig::default();
        BacktestConfig {
            resolve_bars: self.resolve_bars.unwrap_or(defaults.resolve_bars),
            max_trades: self.max_trades.unwrap_or(defaults.max_trades),
            tie_breaker: self.tie_breaker.unwrap_or(defaults.tie_breaker),
            fee_bps: self.fee_bps.unwrap_or(defaults.fee_bps),
            slippage: self.slippage.unwrap_or(defaults.slippage),
        }
    }
}

// ─── Response Shapes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HistoryCounts {
    pub candles: usize,
    pub trades: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeedOutcome {
    pub added: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalSummary {
    pub symbol: String,
    pub candles: usize,
    pub trades: usize,
    pub spikes: Vec<SpikeRecord>,
    pub signal: BreakoutEvaluation,
    pub config: StrategyConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub config: StrategyConfig,
    pub presets: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RangeSnapshot {
    pub hh: f64,
    pub ll: f64,
    pub last_close: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestedTrade {
    pub direction: TradeDirection,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub confidence: f64,
    pub window: usize,
    pub multiplier: f64,
    pub lookback: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoSignalReport {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<RangeSnapshot>,
}

/// A suggestion either carries a full trade plan or explains the pass.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Suggestion {
    Suggested(SuggestedTrade),
    NoSignal(NoSignalReport),
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecuteSizing {
    pub qty: f64,
    pub risk_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteReport {
    pub opened: PaperPosition,
    pub suggestion: BreakoutSignal,
    pub sizing: ExecuteSizing,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResetOutcome {
    pub orders_removed: usize,
    pub positions_removed: usize,
}

// ─── Engine ────────────────────────────────────────────────────────────────

/// Owns every shared piece; the whole API surface hangs off this.
pub struct ScoutEngine {
    /// Bounded per-symbol candle/trade rings.
    history: Arc<MarketHistory>,
    /// Websocket lifecycle, writing into `history`.
    connector: Arc<StreamConnector>,
    /// Paper order book with auto-cancel timers.
    orders: OrderLedger,
    /// Paper positions and realized PnL.
    positions: PositionLedger,
    /// Live strategy knobs; replays snapshot these.
    strategy: Mutex<StrategyConfig>,
}

impl Default for ScoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoutEngine {
    pub fn new() -> Self {
        // 1. Bounded history rings shared by the feed and every reader
        let history = Arc::new(MarketHistory::new());
        // 2. Stream connector writes klines/trades into those rings
        let connector = Arc::new(StreamConnector::new(Arc::clone(&history)));
        // 3. Paper books and the live strategy knobs
        Self {
            history,
            connector,
            orders: OrderLedger::new(),
            positions: PositionLedger::new(),
            strategy: Mutex::new(StrategyConfig::default()),
        }
    }

    /// Launch the connector loop. Requires a tokio runtime; call once.
    pub fn start(&self) {
        tokio::spawn(Arc::clone(&self.connector).run());
        log::info!("[engine] stream connector started");
    }

    // ─── Stream ────────────────────────────────────────────────────────

    pub fn ws_status(&self) -> ConnectionHealth {
        self.connector.health()
    }

    /// Change the subscription target; the live socket is untouched and
    /// picks the new target up on its next cycle.
    pub fn set_stream_target(
        &self,
        symbol: &str,
        interval: Option<&str>,
    ) -> Result<ConnectionHealth, CoreError> {
        let current = self.connector.health().interval;
        self.connector
            .update_target(symbol, interval.unwrap_or(&current))?;
        Ok(self.connector.health())
    }

    pub fn reconnect_stream(&self) -> ConnectionHealth {
        self.connector.force_reconnect();
        self.connector.health()
    }

    /// Retarget and bounce the socket in one step.
    pub fn resubscribe(
        &self,
        symbol: &str,
        interval: Option<&str>,
    ) -> Result<ConnectionHealth, CoreError> {
        self.set_stream_target(symbol, interval)?;
        Ok(self.reconnect_stream())
    }

    pub fn clear_stream_error(&self) -> ConnectionHealth {
        self.connector.clear_last_error();
        self.connector.health()
    }

    // ─── History ───────────────────────────────────────────────────────

    pub fn candles(&self, symbol: Option<&str>, limit: Option<usize>) -> Vec<Candle> {
        let symbol = self.resolve_symbol(symbol);
        match limit {
            Some(limit) => self.history.recent_candles(&symbol, limit),
            None => self.history.candles(&symbol),
        }
    }

    pub fn trades(&self, symbol: Option<&str>, limit: Option<usize>) -> Vec<TradeTick> {
        let symbol = self.resolve_symbol(symbol);
        let limit = limit.unwrap_or(usize::MAX);
        self.history.recent_trades(&symbol, limit)
    }

    pub fn seed_candles(
        &self,
        symbol: Option<&str>,
        rows: &[serde_json::Value],
        replace: bool,
    ) -> SeedOutcome {
        let symbol = self.resolve_symbol(symbol);
        let (parsed, skipped) = crate::data::parse_seed_rows(rows);
        let (added, total) = self.history.seed_candles(&symbol, parsed, replace);
        log::info!("[engine] seeded {added} candles into {symbol} (skipped {skipped})");
        SeedOutcome {
            added,
            skipped,
            total,
        }
    }

    pub fn clear_history(&self, symbol: Option<&str>) -> HistoryCounts {
        let symbol = self.resolve_symbol(symbol);
        self.history.clear(&symbol);
        self.history_counts(Some(&symbol))
    }

    pub fn history_counts(&self, symbol: Option<&str>) -> HistoryCounts {
        let symbol = self.resolve_symbol(symbol);
        let (candles, trades) = self.history.counts(&symbol);
        HistoryCounts { candles, trades }
    }

    // ─── Signals ───────────────────────────────────────────────────────

    pub fn spikes(
        &self,
        symbol: Option<&str>,
        window: Option<usize>,
        multiplier: Option<f64>,
        limit: Option<usize>,
    ) -> Vec<SpikeRecord> {
        let symbol = self.resolve_symbol(symbol);
        let base = self.strategy_snapshot();
        let candles = self.history.candles(&symbol);
        compute_spikes(
            &candles,
            window.unwrap_or(base.window),
            multiplier.unwrap_or(base.multiplier),
            limit.unwrap_or(DEFAULT_SPIKE_LIMIT),
        )
    }

    pub fn signal(
        &self,
        symbol: Option<&str>,
        window: Option<usize>,
        multiplier: Option<f64>,
        lookback: Option<usize>,
    ) -> BreakoutEvaluation {
        let symbol = self.resolve_symbol(symbol);
        let cfg = self.strategy_with(window, multiplier, lookback);
        let candles = self.history.candles(&symbol);
        breakout_signal(&symbol, &candles, &cfg)
    }

    pub fn levels(
        &self,
        symbol: Option<&str>,
        lookback: Option<usize>,
    ) -> Result<RangeLevels, CoreError> {
        let symbol = self.resolve_symbol(symbol);
        let lookback = lookback.unwrap_or_else(|| self.strategy_snapshot().lookback);
        let candles = self.history.candles(&symbol);
        range_levels(&symbol, &candles, lookback)
    }

    /// Everything the dashboard shows at once: counts, fresh spikes, the
    /// current evaluation and the config it used.
    pub fn signal_summary(
        &self,
        symbol: Option<&str>,
        window: Option<usize>,
        multiplier: Option<f64>,
        lookback: Option<usize>,
    ) -> SignalSummary {
        let symbol = self.resolve_symbol(symbol);
        let cfg = self.strategy_with(window, multiplier, lookback);
        let candles = self.history.candles(&symbol);
        let (candle_count, trade_count) = self.history.counts(&symbol);
        SignalSummary {
            spikes: compute_spikes(&candles, cfg.window, cfg.multiplier, SUMMARY_SPIKE_LIMIT),
            signal: breakout_signal(&symbol, &candles, &cfg),
            symbol,
            candles: candle_count,
            trades: trade_count,
            config: cfg,
        }
    }

    // ─── Replay ────────────────────────────────────────────────────────

    pub fn backtest(&self, symbol: Option<&str>, params: &BacktestParams) -> BacktestReport {
        let symbol = self.resolve_symbol(symbol);
        let strategy = params.strategy_over(self.strategy_snapshot());
        let candles = self.history.candles(&symbol);
        run_backtest(&symbol, &candles, &strategy, &params.backtest_config())
    }

    pub fn grid_search(
        &self,
        symbol: Option<&str>,
        axes: &GridParams,
        knobs: &BacktestParams,
    ) -> Result<GridReport, CoreError> {
        let symbol = self.resolve_symbol(symbol);
        let base = knobs.strategy_over(self.strategy_snapshot());
        let candles = self.history.candles(&symbol);
        run_grid_search(&symbol, &candles, &base, &knobs.backtest_config(), axes)
    }

    // ─── Paper Orders ──────────────────────────────────────────────────

    pub fn place_order(&self, params: &PlaceOrderParams) -> Result<PaperOrder, CoreError> {
        let symbol = self.resolve_symbol(params.symbol.as_deref());
        let kind = OrderKind::from_loose(params.kind.as_deref().unwrap_or_default());
        let side = OrderSide::from_loose(params.side.as_deref().unwrap_or_default());
        let qty = params.qty.unwrap_or(1.0);
        match kind {
            OrderKind::Market => self.orders.place_market(&symbol, side, qty),
            OrderKind::Limit => self.orders.place_limit(
                &symbol,
                side,
                qty,
                params.price.unwrap_or(0.0),
                params.cancel_after.unwrap_or(15),
            ),
        }
    }

    pub fn list_orders(&self) -> Vec<PaperOrder> {
        self.orders.list()
    }

    pub fn cancel_order(&self, id: &str) -> Result<PaperOrder, CoreError> {
        self.orders.cancel(id)
    }

    /// Wipe the order book only; positions are untouched. Returns how
    /// many orders went.
    pub fn reset_orders(&self) -> usize {
        self.orders.reset()
    }

    // ─── Paper Positions ───────────────────────────────────────────────

    pub fn open_position(&self, params: &OpenPositionParams) -> Result<PaperPosition, CoreError> {
        let symbol = self.resolve_symbol(params.symbol.as_deref());
        self.positions.open(
            &symbol,
            TradeDirection::from_loose(params.side.as_deref().unwrap_or_default()),
            params.entry.unwrap_or(0.0),
            params.qty.unwrap_or(0.0),
            params.sl.unwrap_or(0.0),
            params.tp.unwrap_or(0.0),
            params.leverage.unwrap_or(1.0),
        )
    }

    /// Close at the explicit price, or at the latest streamed close for
    /// the position's symbol when none is given. A bad explicit price is
    /// rejected, never swapped for the mark.
    pub fn close_position(
        &self,
        id: &str,
        price: Option<f64>,
    ) -> Result<PaperPosition, CoreError> {
        let position = self.positions.get(id)?;
        let resolved = price.or_else(|| {
            let last = self.last_close(&position.symbol);
            (last > 0.0).then_some(last)
        });
        self.positions.close(id, resolved)
    }

    pub fn list_positions(
        &self,
        status: Option<&str>,
        symbol: Option<&str>,
    ) -> Result<Vec<PositionView>, CoreError> {
        let status = match status {
            Some(raw) => Some(
                PositionStatus::from_str(raw)
                    .map_err(|_| CoreError::validation("status must be open or closed"))?,
            ),
            None => None,
        };
        Ok(self
            .positions
            .list(status, symbol, |sym| self.last_close(sym)))
    }

    pub fn size_position(&self, params: &SizeParams) -> Result<PositionSizing, CoreError> {
        size_by_risk(
            params.entry.unwrap_or(0.0),
            params.sl.unwrap_or(0.0),
            params.balance.unwrap_or(0.0),
            params.risk_pct.unwrap_or(0.01),
            params.leverage.unwrap_or(1.0),
        )
    }

    /// The current breakout read as an actionable plan. Thin history is an
    /// error here (the caller asked for advice we cannot give); a quiet
    /// tape is a normal no-signal answer.
    pub fn suggest(
        &self,
        symbol: Option<&str>,
        window: Option<usize>,
        multiplier: Option<f64>,
        lookback: Option<usize>,
    ) -> Result<Suggestion, CoreError> {
        let symbol = self.resolve_symbol(symbol);
        let cfg = self.strategy_with(window, multiplier, lookback);
        let candles = self.history.candles(&symbol);
        match breakout_signal(&symbol, &candles, &cfg) {
            BreakoutEvaluation::Fired(signal) => Ok(Suggestion::Suggested(SuggestedTrade {
                direction: signal.direction,
                entry: signal.entry,
                sl: signal.sl,
                tp: signal.tp,
                confidence: signal.confidence,
                window: signal.window,
                multiplier: cfg.multiplier,
                lookback: signal.lookback,
            })),
            BreakoutEvaluation::Declined(decline) => {
                if decline.reason == "insufficient candles" {
                    return Err(CoreError::insufficient(
                        "insufficient candles for suggestion",
                    ));
                }
                // Any decline past the history check has enough candles
                // for a range read, whatever the reason was.
                let levels = range_levels(&symbol, &candles, cfg.lookback).ok().map(|l| {
                    RangeSnapshot {
                        hh: l.hh,
                        ll: l.ll,
                        last_close: l.last_close,
                    }
                });
                Ok(Suggestion::NoSignal(NoSignalReport {
                    reason: decline.reason,
                    levels,
                }))
            }
        }
    }

    /// Act on the current signal: size it against the balance and open
    /// the paper position. No firing signal is a conflict, not a success
    /// with an empty body.
    pub fn execute_signal(&self, params: &ExecuteParams) -> Result<ExecuteReport, CoreError> {
        let symbol = self.resolve_symbol(params.symbol.as_deref());
        let cfg = self.strategy_with(params.window, params.multiplier, params.lookback);
        let candles = self.history.candles(&symbol);
        let signal = match breakout_signal(&symbol, &candles, &cfg) {
            BreakoutEvaluation::Fired(signal) => signal,
            BreakoutEvaluation::Declined(decline) => {
                return Err(CoreError::conflict(decline.reason));
            }
        };
        let sizing = size_by_risk(
            signal.entry,
            signal.sl,
            params.balance.unwrap_or(0.0),
            params.risk_pct.unwrap_or(0.01),
            params.leverage.unwrap_or(1.0),
        )?;
        let opened = self.positions.open(
            &symbol,
            signal.direction,
            signal.entry,
            sizing.qty,
            signal.sl,
            signal.tp,
            sizing.leverage,
        )?;
        Ok(ExecuteReport {
            opened,
            suggestion: signal,
            sizing: ExecuteSizing {
                qty: sizing.qty,
                risk_amount: sizing.risk_amount,
            },
        })
    }

    // ─── Config & Portfolio ────────────────────────────────────────────

    pub fn config(&self) -> ConfigReport {
        ConfigReport {
            config: self.strategy_snapshot(),
            presets: preset_names(),
        }
    }

    pub fn update_config(&self, patch: &serde_json::Value) -> StrategyConfig {
        let mut cfg = self.strategy.lock().unwrap();
        cfg.apply_partial(patch);
        *cfg
    }

    pub fn apply_preset(&self, name: &str) -> Result<StrategyConfig, CoreError> {
        let preset = find_preset(name)?;
        let mut cfg = self.strategy.lock().unwrap();
        *cfg = preset;
        log::info!("[engine] strategy preset '{name}' applied");
        Ok(*cfg)
    }

    pub fn portfolio(&self) -> PortfolioSummary {
        portfolio_summary(&self.positions.closed())
    }

    /// Wipe both paper books. History and config stay.
    pub fn reset_paper(&self) -> ResetOutcome {
        ResetOutcome {
            orders_removed: self.orders.reset(),
            positions_removed: self.positions.reset(),
        }
    }

    // ─── Helper Functions ──────────────────────────────────────────────

    fn resolve_symbol(&self, requested: Option<&str>) -> String {
        match requested {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => self.connector.health().symbol,
        }
    }

    fn strategy_snapshot(&self) -> StrategyConfig {
        *self.strategy.lock().unwrap()
    }

    /// Live config with any per-call overrides layered on top.
    fn strategy_with(
        &self,
        window: Option<usize>,
        multiplier: Option<f64>,
        lookback: Option<usize>,
    ) -> StrategyConfig {
        let base = self.strategy_snapshot();
        StrategyConfig {
            window: window.unwrap_or(base.window),
            multiplier: multiplier.unwrap_or(base.multiplier),
            lookback: lookback.unwrap_or(base.lookback),
        }
    }

    fn last_close(&self, symbol: &str) -> f64 {
        self.history
            .recent_candles(symbol, 1)
            .last()
            .map(|c| c.close)
            .unwrap_or(0.0)
    }
}
