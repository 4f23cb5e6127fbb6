//! Replay the spike/breakout playbook over buffered candles.
//!
//! # Approach
//! 1. Mark candidate bars: volume clears `multiplier` against a baseline
//!    window that ends one window earlier in the buffer
//! 2. A candidate trades only if its close escapes the prior high/low range
//! 3. Walk forward up to `resolve_bars`; the first touch of stop or target
//!    decides, and a bar touching both defers to the tie-breaker
//! 4. Costs: flat price slippage on entry and managed exits, fees as a
//!    basis-point haircut on unit PnL
//!
//! Runs are pure over a candle snapshot, so the grid can fan them out
//! across threads without locking anything.

use serde::Serialize;

use crate::config::StrategyConfig;
use crate::domain::{Candle, TieBreaker, TradeDirection, TradeOutcome};
use crate::engine::signals::REWARD_RISK;
use crate::utils::{mean, round_to};

// ─── Configuration ─────────────────────────────────────────────────────────

/// Replay knobs, separate from the strategy parameters being judged.
#[derive(Debug, Clone, Copy)]
pub struct BacktestConfig {
    /// Bars a trade gets to hit stop or target before it is left open.
    pub resolve_bars: usize,
    /// Newest bars scanned for entries per run.
    pub max_trades: usize,
    /// Outcome when one bar touches both stop and target.
    pub tie_breaker: TieBreaker,
    /// Fee in basis points, haircut on every unit PnL.
    pub fee_bps: f64,
    /// Absolute price slip on entry and on stop/target exits.
    pub slippage: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            resolve_bars: 10,
            max_trades: 200,
            tie_breaker: TieBreaker::SlWins,
            fee_bps: 0.0,
            slippage: 0.0,
        }
    }
}

// ─── Results ───────────────────────────────────────────────────────────────

/// One simulated trade, with both the plan and the executed fills.
#[derive(Debug, Clone, Serialize)]
pub struct SimTrade {
    /// Index of the entry bar within the replayed buffer.
    pub i: usize,
    pub t: i64,
    pub direction: TradeDirection,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub spike_ratio: f64,
    pub hh: f64,
    pub ll: f64,
    pub bars_to_resolve: usize,
    pub outcome: TradeOutcome,
    pub exec_entry: f64,
    pub exec_exit: f64,
    pub unit_pnl: f64,
    pub tie_breaker: TieBreaker,
    pub fee_bps: f64,
    pub slippage: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BacktestSummary {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub open: usize,
    /// Wins over all trades; open trades count against the rate.
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestRun {
    pub symbol: String,
    pub window: usize,
    pub multiplier: f64,
    pub lookback: usize,
    pub resolve_bars: usize,
    pub tie_breaker: TieBreaker,
    pub fee_bps: f64,
    pub slippage: f64,
    pub candles_used: usize,
    pub trades: Vec<SimTrade>,
    pub summary: BacktestSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestDecline {
    pub reason: String,
}

/// A replay either completes or explains why it could not run.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BacktestReport {
    Completed(BacktestRun),
    Insufficient(BacktestDecline),
}

impl BacktestReport {
    fn insufficient(reason: &str) -> Self {
        Self::Insufficient(BacktestDecline {
            reason: reason.to_string(),
        })
    }

    pub fn completed(&self) -> Option<&BacktestRun> {
        match self {
            Self::Completed(run) => Some(run),
            Self::Insufficient(_) => None,
        }
    }

    pub fn decline_reason(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Insufficient(decline) => Some(&decline.reason),
        }
    }
}

// ─── Replay ────────────────────────────────────────────────────────────────

pub fn run_backtest(
    symbol: &str,
    candles: &[Candle],
    strategy: &StrategyConfig,
    cfg: &BacktestConfig,
) -> BacktestReport {
    let n = candles.len();
    // Saturating sums keep absurd parameter values on the decline path.
    let needed = strategy
        .lookback
        .saturating_add(1)
        .max(strategy.window.saturating_add(1))
        .max(cfg.resolve_bars.saturating_add(2));
    if n < needed || strategy.lookback < 2 {
        return BacktestReport::insufficient("insufficient candles");
    }

    let i_start = (strategy.lookback + 1).max(strategy.window + 1);
    let i_end = n - cfg.resolve_bars - 1;
    if i_end <= i_start {
        return BacktestReport::insufficient("not enough forward bars to resolve");
    }

    // max_trades caps the bars scanned, counted from the newest end,
    // not the number of qualifying spikes.
    let span = i_end - i_start;
    let scan_from = i_start + span.saturating_sub(cfg.max_trades);

    let trades: Vec<SimTrade> = (scan_from..i_end)
        .filter_map(|i| {
            let ratio = spike_ratio_at(candles, i, strategy.window);
            (ratio >= strategy.multiplier)
                .then(|| simulate_candidate(candles, i, ratio, strategy, cfg))
                .flatten()
        })
        .collect();
    let summary = summarize(&trades);

    log::info!(
        "[backtest] {symbol}: {} trades over {} candles, expectancy {:.8}",
        summary.total,
        n,
        summary.expectancy
    );

    BacktestReport::Completed(BacktestRun {
        symbol: symbol.to_string(),
        window: strategy.window,
        multiplier: strategy.multiplier,
        lookback: strategy.lookback,
        resolve_bars: cfg.resolve_bars,
        tie_breaker: cfg.tie_breaker,
        fee_bps: cfg.fee_bps,
        slippage: cfg.slippage,
        candles_used: n,
        trades,
        summary,
    })
}

// ─── Helper Functions ──────────────────────────────────────────────────────

/// Relative volume of bar `i` against a baseline that ends one window
/// earlier. Early in the buffer, where that baseline is not yet full,
/// the adjacent window fills in. The live scan always uses the adjacent
/// window, so replay ratios and live ratios agree only after warm-up.
fn spike_ratio_at(candles: &[Candle], i: usize, window: usize) -> f64 {
    let start = i.saturating_sub(window);
    let prev_start = i.saturating_sub(2 * window);
    let prev_end = (i + 1).saturating_sub(window);
    let mut baseline: &[Candle] = if prev_end > prev_start {
        &candles[prev_start..prev_end]
    } else {
        &[]
    };
    if baseline.len() < window {
        baseline = &candles[start..i];
    }
    let volumes: Vec<f64> = baseline.iter().map(|c| c.base_volume).collect();
    let avg = mean(&volumes);
    if avg > 0.0 {
        candles[i].base_volume / avg
    } else {
        0.0
    }
}

fn simulate_candidate(
    candles: &[Candle],
    i: usize,
    ratio: f64,
    strategy: &StrategyConfig,
    cfg: &BacktestConfig,
) -> Option<SimTrade> {
    let n = candles.len();
    let prior = &candles[i - strategy.lookback..i];
    // Range ends at bar i-2: the bar right before entry never counts,
    // matching how the range was derived when this playbook was tuned.
    let prior = &prior[..prior.len() - 1];
    let hh = prior.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let ll = prior.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

    let cur = candles[i];
    let entry = cur.close;
    let direction = if entry > hh {
        TradeDirection::Long
    } else if entry < ll {
        TradeDirection::Short
    } else {
        return None;
    };
    let long = direction == TradeDirection::Long;

    let (sl, tp) = if long {
        let sl = (entry - cur.range()).max(ll);
        (sl, entry + REWARD_RISK * (entry - sl))
    } else {
        let sl = (entry + cur.range()).min(hh);
        (sl, entry - REWARD_RISK * (sl - entry))
    };

    let mut outcome = TradeOutcome::Open;
    let mut bars_used = 0;
    for j in (i + 1)..n.min(i + 1 + cfg.resolve_bars) {
        bars_used = j - i;
        let hi = candles[j].high;
        let lo = candles[j].low;
        let (hit_tp, hit_sl) = if long {
            (hi >= tp, lo <= sl)
        } else {
            (lo <= tp, hi >= sl)
        };
        if hit_tp && hit_sl {
            outcome = match cfg.tie_breaker {
                TieBreaker::SlWins => TradeOutcome::Loss,
                TieBreaker::TpWins => TradeOutcome::Win,
            };
            break;
        } else if hit_tp {
            outcome = TradeOutcome::Win;
            break;
        } else if hit_sl {
            outcome = TradeOutcome::Loss;
            break;
        }
    }

    let slip = cfg.slippage;
    let exec_entry = if long { entry + slip } else { entry - slip };
    let exec_exit = match outcome {
        TradeOutcome::Win => {
            if long {
                tp - slip
            } else {
                tp + slip
            }
        }
        TradeOutcome::Loss => {
            if long {
                sl - slip
            } else {
                sl + slip
            }
        }
        // Open trades mark at the last walked close, no slip charged.
        TradeOutcome::Open => {
            if bars_used > 0 {
                candles[i + bars_used].close
            } else {
                entry
            }
        }
    };
    let fee_mult = 1.0 - cfg.fee_bps / 10_000.0;
    let unit_pnl = if long {
        (exec_exit - exec_entry) * fee_mult
    } else {
        (exec_entry - exec_exit) * fee_mult
    };

    Some(SimTrade {
        i,
        t: cur.timestamp_ms,
        direction,
        entry: round_to(entry, 8),
        sl: round_to(sl, 8),
        tp: round_to(tp, 8),
        spike_ratio: round_to(ratio, 3),
        hh,
        ll,
        bars_to_resolve: bars_used,
        outcome,
        exec_entry: round_to(exec_entry, 8),
        exec_exit: round_to(exec_exit, 8),
        unit_pnl: round_to(unit_pnl, 8),
        tie_breaker: cfg.tie_breaker,
        fee_bps: cfg.fee_bps,
        slippage: slip,
    })
}

fn summarize(trades: &[SimTrade]) -> BacktestSummary {
    let wins: Vec<f64> = trades
        .iter()
        .filter(|t| t.outcome == TradeOutcome::Win)
        .map(|t| t.unit_pnl)
        .collect();
    let losses: Vec<f64> = trades
        .iter()
        .filter(|t| t.outcome == TradeOutcome::Loss)
        .map(|t| t.unit_pnl)
        .collect();
    let open = trades.len() - wins.len() - losses.len();

    let avg_win = mean(&wins);
    let avg_loss = mean(&losses);
    // Open trades stay in the denominator, dragging both numbers down.
    let total = trades.len();
    let (win_rate, expectancy) = if total > 0 {
        let win_share = wins.len() as f64 / total as f64;
        let loss_share = losses.len() as f64 / total as f64;
        (win_share, win_share * avg_win + loss_share * avg_loss)
    } else {
        (0.0, 0.0)
    };

    BacktestSummary {
        total: trades.len(),
        wins: wins.len(),
        losses: losses.len(),
        open,
        win_rate: round_to(win_rate, 4),
        avg_win: round_to(avg_win, 8),
        avg_loss: round_to(avg_loss, 8),
        expectancy: round_to(expectancy, 8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(t: i64) -> Candle {
        Candle::new(t, 100.0, 101.0, 99.0, 100.0, 10.0)
    }

    fn strategy() -> StrategyConfig {
        StrategyConfig {
            window: 3,
            multiplier: 2.0,
            lookback: 3,
        }
    }

    fn resolve(bars: usize) -> BacktestConfig {
        BacktestConfig {
            resolve_bars: bars,
            ..BacktestConfig::default()
        }
    }

    /// Quiet tape, a volume spike breaking out at bar 6, target hit at 7.
    fn winning_tape() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..6).map(quiet).collect();
        candles.push(Candle::new(6, 100.0, 103.5, 102.5, 103.0, 30.0));
        candles.push(Candle::new(7, 103.0, 105.0, 103.0, 104.5, 10.0));
        candles.extend((8..13).map(quiet));
        candles
    }

    #[test]
    fn thin_history_declines() {
        let candles: Vec<Candle> = (0..10).map(quiet).collect();
        let report = run_backtest("BTCUSDT", &candles, &StrategyConfig::default(), &resolve(5));
        assert_eq!(report.decline_reason(), Some("insufficient candles"));
    }

    #[test]
    fn no_room_to_resolve_declines() {
        let candles: Vec<Candle> = (0..12).map(quiet).collect();
        let strategy = StrategyConfig {
            window: 2,
            multiplier: 2.0,
            lookback: 2,
        };
        let report = run_backtest("BTCUSDT", &candles, &strategy, &resolve(10));
        assert_eq!(
            report.decline_reason(),
            Some("not enough forward bars to resolve")
        );
    }

    #[test]
    fn baseline_sits_one_window_back_with_early_fallback() {
        let mut candles: Vec<Candle> = (0..7).map(quiet).collect();
        candles[4] = Candle::new(4, 100.0, 101.0, 99.0, 100.0, 50.0);
        candles[6] = Candle::new(6, 100.0, 101.0, 99.0, 100.0, 30.0);
        // i=6 reaches back to bars 0..=3, skipping the loud bar 4.
        assert!((spike_ratio_at(&candles, 6, 3) - 3.0).abs() < 1e-9);
        // i=4 has no full prior window yet, so the adjacent bars fill in.
        assert!((spike_ratio_at(&candles, 4, 3) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn long_breakout_resolves_to_a_win() {
        let report = run_backtest("BTCUSDT", &winning_tape(), &strategy(), &resolve(5));
        let run = report.completed().expect("replay should complete");
        assert_eq!(run.trades.len(), 1);

        let trade = &run.trades[0];
        assert_eq!(trade.i, 6);
        assert_eq!(trade.direction, TradeDirection::Long);
        assert_eq!(trade.entry, 103.0);
        assert_eq!(trade.sl, 102.0);
        assert_eq!(trade.tp, 104.5);
        assert_eq!(trade.hh, 101.0);
        assert_eq!(trade.ll, 99.0);
        assert_eq!(trade.outcome, TradeOutcome::Win);
        assert_eq!(trade.bars_to_resolve, 1);
        assert_eq!(trade.tie_breaker, TieBreaker::SlWins);
        assert_eq!(trade.unit_pnl, 1.5);

        assert_eq!(run.summary.total, 1);
        assert_eq!(run.summary.wins, 1);
        assert_eq!(run.summary.win_rate, 1.0);
        assert_eq!(run.summary.expectancy, 1.5);
    }

    #[test]
    fn bar_touching_both_sides_defers_to_tie_breaker() {
        let mut candles = winning_tape();
        candles[7] = Candle::new(7, 103.0, 105.0, 101.0, 102.0, 10.0);

        let report = run_backtest("BTCUSDT", &candles, &strategy(), &resolve(5));
        let trade = &report.completed().unwrap().trades[0];
        assert_eq!(trade.outcome, TradeOutcome::Loss);
        assert_eq!(trade.tie_breaker, TieBreaker::SlWins);
        assert_eq!(trade.unit_pnl, -1.0);

        let cfg = BacktestConfig {
            resolve_bars: 5,
            tie_breaker: TieBreaker::TpWins,
            ..BacktestConfig::default()
        };
        let report = run_backtest("BTCUSDT", &candles, &strategy(), &cfg);
        let trade = &report.completed().unwrap().trades[0];
        assert_eq!(trade.outcome, TradeOutcome::Win);
        assert_eq!(trade.tie_breaker, TieBreaker::TpWins);
    }

    #[test]
    fn untouched_trade_stays_open_and_marks_at_close() {
        let mut candles: Vec<Candle> = (0..6).map(quiet).collect();
        candles.push(Candle::new(6, 100.0, 103.5, 102.5, 103.0, 30.0));
        for t in 7..13 {
            candles.push(Candle::new(t, 103.0, 103.8, 102.6, 103.2, 10.0));
        }

        let report = run_backtest("BTCUSDT", &candles, &strategy(), &resolve(5));
        let run = report.completed().unwrap();
        let trade = &run.trades[0];
        assert_eq!(trade.outcome, TradeOutcome::Open);
        assert_eq!(trade.bars_to_resolve, 5);
        assert_eq!(trade.exec_exit, 103.2);
        assert!((trade.unit_pnl - 0.2).abs() < 1e-9);
        assert_eq!(run.summary.open, 1);
        assert_eq!(run.summary.win_rate, 0.0);
        assert_eq!(run.summary.expectancy, 0.0);
    }

    /// One win plus one open: the open trade halves the win rate and
    /// dilutes expectancy instead of vanishing from the denominator.
    #[test]
    fn open_trades_count_against_the_win_rate() {
        let mut candles: Vec<Candle> = (0..6).map(quiet).collect();
        candles.push(Candle::new(6, 100.0, 103.5, 102.5, 103.0, 30.0));
        candles.push(Candle::new(7, 103.0, 105.0, 103.0, 104.5, 10.0));
        candles.push(quiet(8));
        candles.push(Candle::new(9, 100.0, 105.8, 104.9, 105.5, 40.0));
        candles.push(Candle::new(10, 105.5, 106.0, 104.7, 105.4, 10.0));
        candles.push(Candle::new(11, 105.4, 106.2, 104.8, 105.9, 10.0));
        candles.extend((12..16).map(quiet));

        let report = run_backtest("BTCUSDT", &candles, &strategy(), &resolve(2));
        let run = report.completed().unwrap();
        assert_eq!(run.summary.total, 2);
        assert_eq!(run.summary.wins, 1);
        assert_eq!(run.summary.losses, 0);
        assert_eq!(run.summary.open, 1);
        assert_eq!(run.summary.win_rate, 0.5);
        assert!((run.summary.expectancy - 0.75).abs() < 1e-9);
    }

    #[test]
    fn slippage_and_fees_erode_the_win() {
        let cfg = BacktestConfig {
            resolve_bars: 5,
            fee_bps: 10.0,
            slippage: 0.1,
            ..BacktestConfig::default()
        };
        let report = run_backtest("BTCUSDT", &winning_tape(), &strategy(), &cfg);
        let trade = &report.completed().unwrap().trades[0];
        assert_eq!(trade.exec_entry, 103.1);
        assert_eq!(trade.exec_exit, 104.4);
        assert!((trade.unit_pnl - 1.2987).abs() < 1e-9);
    }

    #[test]
    fn short_breakdown_resolves_to_a_win() {
        let mut candles: Vec<Candle> = (0..6).map(quiet).collect();
        candles.push(Candle::new(6, 100.0, 97.5, 96.5, 97.0, 30.0));
        candles.push(Candle::new(7, 97.0, 97.0, 95.0, 95.2, 10.0));
        candles.extend((8..13).map(quiet));

        let report = run_backtest("BTCUSDT", &candles, &strategy(), &resolve(5));
        let trade = &report.completed().unwrap().trades[0];
        assert_eq!(trade.direction, TradeDirection::Short);
        assert_eq!(trade.sl, 98.0);
        assert_eq!(trade.tp, 95.5);
        assert_eq!(trade.outcome, TradeOutcome::Win);
        assert_eq!(trade.unit_pnl, 1.5);
    }

    #[test]
    fn max_trades_caps_the_scanned_bars_not_the_spikes() {
        let mut candles: Vec<Candle> = (0..6).map(quiet).collect();
        candles.push(Candle::new(6, 100.0, 103.5, 102.5, 103.0, 40.0));
        candles.push(Candle::new(7, 103.0, 103.2, 99.5, 100.0, 10.0));
        candles.push(quiet(8));
        candles.push(Candle::new(9, 100.0, 105.5, 104.5, 105.0, 40.0));
        candles.push(Candle::new(10, 105.0, 107.0, 104.5, 106.0, 10.0));
        candles.extend((11..16).map(quiet));

        let uncapped = run_backtest("BTCUSDT", &candles, &strategy(), &resolve(2));
        assert_eq!(uncapped.completed().unwrap().trades.len(), 2);

        // A cap of four scans bars 9..13, so only the later breakout trades.
        let cfg = BacktestConfig {
            resolve_bars: 2,
            max_trades: 4,
            ..BacktestConfig::default()
        };
        let capped = run_backtest("BTCUSDT", &candles, &strategy(), &cfg);
        let run = capped.completed().unwrap();
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.trades[0].i, 9);
        assert_eq!(run.trades[0].outcome, TradeOutcome::Win);
    }

    /// An early spike with a quiet tail: a cap of one scans only the last
    /// bar, so the spike from the start of the tape never resurfaces.
    #[test]
    fn capped_scan_does_not_reach_back_for_old_spikes() {
        let mut candles = winning_tape();
        candles.extend((13..18).map(quiet));

        let cfg = BacktestConfig {
            resolve_bars: 2,
            max_trades: 1,
            ..BacktestConfig::default()
        };
        let report = run_backtest("BTCUSDT", &candles, &strategy(), &cfg);
        let run = report.completed().unwrap();
        assert!(run.trades.is_empty());
        assert_eq!(run.summary.total, 0);
    }

    #[test]
    fn lookback_below_two_declines() {
        let strategy = StrategyConfig {
            window: 3,
            multiplier: 2.0,
            lookback: 1,
        };
        let report = run_backtest("BTCUSDT", &winning_tape(), &strategy, &resolve(5));
        assert_eq!(report.decline_reason(), Some("insufficient candles"));
    }

    #[test]
    fn oversized_parameters_decline_instead_of_overflowing() {
        let strategy = StrategyConfig {
            window: usize::MAX,
            multiplier: 2.0,
            lookback: usize::MAX,
        };
        let report = run_backtest("BTCUSDT", &winning_tape(), &strategy, &resolve(usize::MAX));
        assert_eq!(report.decline_reason(), Some("insufficient candles"));
    }
}
