//! Parameter sweep over the replay engine.
//!
//! # Approach
//! 1. Expand each axis (windows, multipliers, lookbacks) from a list or an
//!    inclusive start/stop/step range, defaulting to the live value
//! 2. Run the full Cartesian product against one candle snapshot, fanned
//!    out with rayon since every replay is pure
//! 3. Rank by expectancy, then win rate, then trade count, keep the top 10
//!
//! Combos that cannot replay (lookback longer than the buffer, say) are
//! skipped rather than failing the sweep.

use std::cmp::Ordering;

use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::domain::Candle;
use crate::engine::backtest::{run_backtest, BacktestConfig};
use crate::error::CoreError;

/// Hard ceiling on combinations per sweep; beyond this the request is
/// rejected outright instead of pinning every core for minutes.
const GRID_MAX_COMBOS: usize = 2_000;

/// How many ranked rows a report keeps.
const GRID_TOP_N: usize = 10;

/// One axis of the sweep: explicit values, or an integer range.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Values(Vec<f64>),
    Range {
        start: f64,
        stop: f64,
        step: Option<f64>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GridParams {
    pub windows: Option<AxisSpec>,
    pub multipliers: Option<AxisSpec>,
    pub lookbacks: Option<AxisSpec>,
}

/// One ranked parameter combination.
#[derive(Debug, Clone, Serialize)]
pub struct GridEntry {
    pub window: usize,
    pub multiplier: f64,
    pub lookback: usize,
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub expectancy: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridReport {
    pub symbol: String,
    /// Combinations that produced a replay.
    pub tried: usize,
    /// Combinations skipped because the replay declined.
    pub skipped: usize,
    pub top: Vec<GridEntry>,
}

pub fn run_grid_search(
    symbol: &str,
    candles: &[Candle],
    base: &StrategyConfig,
    cfg: &BacktestConfig,
    params: &GridParams,
) -> Result<GridReport, CoreError> {
    let windows: Vec<usize> = expand_axis(params.windows.as_ref(), base.window as f64)
        .into_iter()
        .map(|v| v as usize)
        .collect();
    let multipliers = expand_axis(params.multipliers.as_ref(), base.multiplier);
    let lookbacks: Vec<usize> = expand_axis(params.lookbacks.as_ref(), base.lookback as f64)
        .into_iter()
        .map(|v| v as usize)
        .collect();

    let combo_count = windows
        .len()
        .saturating_mul(multipliers.len())
        .saturating_mul(lookbacks.len());
    if combo_count > GRID_MAX_COMBOS {
        return Err(CoreError::validation(format!(
            "grid of {combo_count} combinations exceeds the cap of {GRID_MAX_COMBOS}"
        )));
    }

    let combos: Vec<(usize, f64, usize)> =
        iproduct!(windows, multipliers, lookbacks).collect();
    log::info!(
        "[grid] {symbol}: sweeping {} combinations over {} candles",
        combos.len(),
        candles.len()
    );

    let outcomes: Vec<Option<GridEntry>> = combos
        .par_iter()
        .map(|&(window, multiplier, lookback)| {
            let strategy = StrategyConfig {
                window,
                multiplier,
                lookback,
            };
            let run = run_backtest(symbol, candles, &strategy, cfg);
            run.completed().map(|run| GridEntry {
                window,
                multiplier,
                lookback,
                total: run.summary.total,
                wins: run.summary.wins,
                losses: run.summary.losses,
                win_rate: run.summary.win_rate,
                expectancy: run.summary.expectancy,
                avg_win: run.summary.avg_win,
                avg_loss: run.summary.avg_loss,
            })
        })
        .collect();

    let skipped = outcomes.iter().filter(|o| o.is_none()).count();
    let mut results: Vec<GridEntry> = outcomes.into_iter().flatten().collect();
    let tried = results.len();
    rank(&mut results);
    results.truncate(GRID_TOP_N);

    Ok(GridReport {
        symbol: symbol.to_string(),
        tried,
        skipped,
        top: results,
    })
}

// ─── Helper Functions ──────────────────────────────────────────────────────

/// Best first: expectancy, then win rate, then sample size.
fn rank(results: &mut [GridEntry]) {
    results.sort_by(|a, b| {
        b.expectancy
            .partial_cmp(&a.expectancy)
            .unwrap_or(Ordering::Equal)
            .then(
                b.win_rate
                    .partial_cmp(&a.win_rate)
                    .unwrap_or(Ordering::Equal),
            )
            .then(b.total.cmp(&a.total))
    });
}

/// Ranges walk integers from start to stop inclusive, step clamped to 1+.
fn expand_axis(spec: Option<&AxisSpec>, fallback: f64) -> Vec<f64> {
    match spec {
        None => vec![fallback],
        Some(AxisSpec::Values(values)) => values.clone(),
        Some(AxisSpec::Range { start, stop, step }) => {
            let step = (step.unwrap_or(1.0).trunc() as i64).max(1);
            let stop = stop.trunc() as i64;
            let mut out = Vec::new();
            let mut v = start.trunc() as i64;
            while v <= stop {
                out.push(v as f64);
                v += step;
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(t: i64) -> Candle {
        Candle::new(t, 100.0, 101.0, 99.0, 100.0, 10.0)
    }

    /// Same breakout tape the replay tests use: spike at 6, win at 7.
    fn tape() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..6).map(quiet).collect();
        candles.push(Candle::new(6, 100.0, 103.5, 102.5, 103.0, 30.0));
        candles.push(Candle::new(7, 103.0, 105.0, 103.0, 104.5, 10.0));
        candles.extend((8..13).map(quiet));
        candles
    }

    fn base() -> StrategyConfig {
        StrategyConfig {
            window: 3,
            multiplier: 2.0,
            lookback: 3,
        }
    }

    fn cfg() -> BacktestConfig {
        BacktestConfig {
            resolve_bars: 5,
            ..BacktestConfig::default()
        }
    }

    fn entry(expectancy: f64, win_rate: f64, total: usize) -> GridEntry {
        GridEntry {
            window: 3,
            multiplier: 2.0,
            lookback: 3,
            total,
            wins: 0,
            losses: 0,
            win_rate,
            expectancy,
            avg_win: 0.0,
            avg_loss: 0.0,
        }
    }

    #[test]
    fn axis_absent_falls_back_to_live_value() {
        assert_eq!(expand_axis(None, 20.0), vec![20.0]);
    }

    #[test]
    fn axis_list_passes_through() {
        let spec = AxisSpec::Values(vec![1.5, 2.0, 2.5]);
        assert_eq!(expand_axis(Some(&spec), 0.0), vec![1.5, 2.0, 2.5]);
    }

    #[test]
    fn axis_range_is_inclusive_with_clamped_step() {
        let spec = AxisSpec::Range {
            start: 5.0,
            stop: 11.0,
            step: Some(3.0),
        };
        assert_eq!(expand_axis(Some(&spec), 0.0), vec![5.0, 8.0, 11.0]);

        let degenerate = AxisSpec::Range {
            start: 2.0,
            stop: 4.0,
            step: Some(0.0),
        };
        assert_eq!(expand_axis(Some(&degenerate), 0.0), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn axis_spec_deserializes_both_shapes() {
        let list: AxisSpec = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(expand_axis(Some(&list), 0.0), vec![1.0, 2.0, 3.0]);

        let range: AxisSpec = serde_json::from_str(r#"{"start": 1, "stop": 3}"#).unwrap();
        assert_eq!(expand_axis(Some(&range), 0.0), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn ranking_orders_by_expectancy_then_win_rate_then_total() {
        let mut results = vec![
            entry(0.5, 0.5, 10),
            entry(1.5, 0.2, 3),
            entry(0.5, 0.8, 2),
            entry(0.5, 0.8, 9),
        ];
        rank(&mut results);
        assert_eq!(results[0].expectancy, 1.5);
        assert_eq!((results[1].win_rate, results[1].total), (0.8, 9));
        assert_eq!((results[2].win_rate, results[2].total), (0.8, 2));
        assert_eq!((results[3].win_rate, results[3].total), (0.5, 10));
    }

    #[test]
    fn sweep_ranks_the_profitable_combo_first() {
        let params = GridParams {
            multipliers: Some(AxisSpec::Values(vec![2.0, 999.0])),
            ..GridParams::default()
        };
        let report = run_grid_search("BTCUSDT", &tape(), &base(), &cfg(), &params).unwrap();
        assert_eq!(report.tried, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.top.len(), 2);
        assert_eq!(report.top[0].multiplier, 2.0);
        assert_eq!(report.top[0].expectancy, 1.5);
        assert_eq!(report.top[1].total, 0);
    }

    #[test]
    fn undersized_buffers_are_skipped_not_fatal() {
        let params = GridParams {
            lookbacks: Some(AxisSpec::Values(vec![3.0, 50.0])),
            ..GridParams::default()
        };
        let report = run_grid_search("BTCUSDT", &tape(), &base(), &cfg(), &params).unwrap();
        assert_eq!(report.tried, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.top.len(), 1);
        assert_eq!(report.top[0].lookback, 3);
    }

    #[test]
    fn oversized_grids_are_rejected() {
        let params = GridParams {
            windows: Some(AxisSpec::Range {
                start: 0.0,
                stop: 2_000.0,
                step: None,
            }),
            ..GridParams::default()
        };
        let err = run_grid_search("BTCUSDT", &tape(), &base(), &cfg(), &params).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("2001 combinations"));
    }
}
