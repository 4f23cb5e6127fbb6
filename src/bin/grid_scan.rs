use anyhow::{bail, Result};
use breakout_scout::domain::Candle;
use breakout_scout::engine::{
    run_backtest, run_grid_search, AxisSpec, BacktestConfig, GridParams,
};
use breakout_scout::StrategyConfig;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tabled::{Table, Tabled};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sweep breakout parameters over a synthetic tape", long_about = None)]
struct Cli {
    /// Candles in the synthetic tape
    #[arg(long, default_value_t = 1_500)]
    candles: usize,

    /// Seed for the tape generator (same seed, same tape)
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Bars between injected volume bursts
    #[arg(long, default_value_t = 37)]
    burst_every: usize,

    /// Window axis, comma separated
    #[arg(long, default_value = "10,20,40")]
    windows: String,

    /// Multiplier axis, comma separated
    #[arg(long, default_value = "1.5,2,2.5,3")]
    multipliers: String,

    /// Lookback axis, comma separated
    #[arg(long, default_value = "10,20,30")]
    lookbacks: String,

    /// Bars each simulated trade gets to resolve
    #[arg(long, default_value_t = 10)]
    resolve_bars: usize,

    /// Taker fee per side, in basis points
    #[arg(long, default_value_t = 0.0)]
    fee_bps: f64,

    /// Absolute slippage per fill
    #[arg(long, default_value_t = 0.0)]
    slippage: f64,
}

#[derive(Tabled)]
struct LeaderRow {
    #[tabled(rename = "Window")]
    window: usize,
    #[tabled(rename = "Mult")]
    multiplier: f64,
    #[tabled(rename = "Lookback")]
    lookback: usize,
    #[tabled(rename = "Trades")]
    total: usize,
    #[tabled(rename = "Win Rate")]
    win_rate: String,
    #[tabled(rename = "Expectancy")]
    expectancy: String,
}

fn main() -> Result<()> {
    // 1. Setup Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    // 2. Deterministic synthetic tape with injected breakout bursts
    let tape = synthetic_tape(args.candles, args.seed, args.burst_every.max(2));
    log::info!(
        "🚀 Scanning a {}-candle tape (seed {}, burst every {} bars)",
        tape.len(),
        args.seed,
        args.burst_every.max(2)
    );

    let cfg = BacktestConfig {
        resolve_bars: args.resolve_bars,
        fee_bps: args.fee_bps,
        slippage: args.slippage,
        ..BacktestConfig::default()
    };

    // 3. Single replay at the default strategy, as the baseline
    let base = StrategyConfig::default();
    match run_backtest("SYNTH", &tape, &base, &cfg).completed() {
        Some(run) => log::info!(
            "[baseline] w={} m={} l={}: {} trades, win_rate={:.4}, expectancy={:.8}",
            base.window,
            base.multiplier,
            base.lookback,
            run.summary.total,
            run.summary.win_rate,
            run.summary.expectancy
        ),
        None => bail!("tape too short for the baseline replay; raise --candles"),
    }

    // 4. Grid sweep over the requested axes
    let params = GridParams {
        windows: parse_axis(&args.windows)?,
        multipliers: parse_axis(&args.multipliers)?,
        lookbacks: parse_axis(&args.lookbacks)?,
    };
    let report = run_grid_search("SYNTH", &tape, &base, &cfg, &params)?;
    log::info!(
        "✅ Grid done: {} combos ran, {} skipped",
        report.tried,
        report.skipped
    );

    // 5. Leaderboard
    let rows: Vec<LeaderRow> = report
        .top
        .iter()
        .map(|e| LeaderRow {
            window: e.window,
            multiplier: e.multiplier,
            lookback: e.lookback,
            total: e.total,
            win_rate: format!("{:.4}", e.win_rate),
            expectancy: format!("{:.8}", e.expectancy),
        })
        .collect();
    if rows.is_empty() {
        log::warn!("⚠ Every combination was skipped; nothing to rank.");
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

// ─── Helper Functions ──────────────────────────────────────────────────────

fn parse_axis(raw: &str) -> Result<Option<AxisSpec>> {
    let mut values = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) => bail!("axis value '{part}' is not a number"),
        }
    }
    Ok((!values.is_empty()).then(|| AxisSpec::Values(values)))
}

/// Random-walk tape with a volume burst and directional push every
/// `burst_every` bars, so the scan has real breakouts to chew on.
fn synthetic_tape(len: usize, seed: u64, burst_every: usize) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price: f64 = 100.0;
    let mut tape = Vec::with_capacity(len);
    for i in 0..len {
        let open = price;
        let burst = i > 0 && i % burst_every == 0;
        let drift = rng.gen_range(-0.2..0.2);
        let push = if burst {
            // Alternate burst direction so both sides get exercised.
            if (i / burst_every) % 2 == 0 { 1.6 } else { -1.6 }
        } else {
            0.0
        };
        let close = (open + drift + push).max(1.0);
        let wick = rng.gen_range(0.0..0.2);
        let volume = if burst {
            rng.gen_range(80.0..120.0)
        } else {
            rng.gen_range(8.0..12.0)
        };
        tape.push(Candle::new(
            i as i64 * 60_000,
            open,
            open.max(close) + wick,
            open.min(close) - wick,
            close,
            volume,
        ));
        price = close;
    }
    tape
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Same seed, same tape; a different seed walks elsewhere.
    #[test]
    fn tape_is_deterministic_by_seed() {
        let a = synthetic_tape(120, 7, 37);
        let b = synthetic_tape(120, 7, 37);
        let c = synthetic_tape(120, 8, 37);
        assert_eq!(a.len(), 120);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn burst_bars_carry_outsized_volume() {
        let tape = synthetic_tape(80, 3, 20);
        assert!(tape[20].base_volume >= 80.0);
        assert!(tape[60].base_volume >= 80.0);
        assert!(tape[21].base_volume < 80.0);
    }
}
