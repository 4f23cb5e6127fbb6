mod backtest;
mod core;
mod grid;
mod signals;

pub use backtest::{
    run_backtest, BacktestConfig, BacktestReport, BacktestRun, BacktestSummary, SimTrade,
};
pub use core::{
    BacktestParams, ConfigReport, ExecuteParams, ExecuteReport, ExecuteSizing, HistoryCounts,
    NoSignalReport, OpenPositionParams, PlaceOrderParams, RangeSnapshot, ResetOutcome,
    ScoutEngine, SeedOutcome, SignalSummary, SizeParams, SuggestedTrade, Suggestion,
};
pub use grid::{run_grid_search, AxisSpec, GridEntry, GridParams, GridReport};
pub use signals::{
    breakout_signal, compute_spikes, range_levels, BreakoutDecline, BreakoutEvaluation,
    BreakoutSignal, RangeLevels, SpikeRecord,
};

pub(crate) use signals::REWARD_RISK;
