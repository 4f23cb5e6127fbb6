use std::time::Duration;

use anyhow::Result;
use breakout_scout::utils::epoch_ms_to_utc;
use breakout_scout::{ScoutEngine, BITUNIX};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Attach to the live feed and watch the rings fill", long_about = None)]
struct Cli {
    /// Futures symbol to subscribe to
    #[arg(long, default_value = BITUNIX.stream.symbol)]
    symbol: String,

    /// Kline channel name (e.g. market_kline_1min)
    #[arg(long, default_value = BITUNIX.stream.interval)]
    interval: String,

    /// Seconds to stay attached before the wrap-up summary
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Seconds between status lines
    #[arg(long, default_value_t = 10)]
    every: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Setup Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    // 2. Engine with the requested stream target
    let engine = ScoutEngine::new();
    engine.set_stream_target(&args.symbol, Some(&args.interval))?;
    engine.start();
    log::info!(
        "🚀 Probing {} / {} for {}s",
        args.symbol,
        args.interval,
        args.duration
    );

    // 3. Periodic health lines while the feed fills the rings
    let mut elapsed = 0u64;
    while elapsed < args.duration {
        let step = args.every.clamp(1, args.duration - elapsed);
        tokio::time::sleep(Duration::from_secs(step)).await;
        elapsed += step;

        let health = engine.ws_status();
        let counts = engine.history_counts(None);
        let last_frame = health
            .last_msg_ts
            .map(epoch_ms_to_utc)
            .unwrap_or_else(|| "never".to_string());
        log::info!(
            "[probe] phase={} connected={} candles={} trades={} last_frame={last_frame}",
            health.phase,
            health.connected,
            counts.candles,
            counts.trades
        );
        if let Some(err) = health.last_error {
            log::warn!("⚠ last stream error: {err}");
        }
    }

    // 4. Wrap-up: the full signal summary as JSON
    let summary = engine.signal_summary(None, None, None, None);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.candles == 0 {
        log::warn!("⚠ No candles arrived. Check the symbol/interval pair.");
    } else {
        log::info!("✅ Done: {} candles, {} trades", summary.candles, summary.trades);
    }
    Ok(())
}
