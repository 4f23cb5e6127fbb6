//! Volume-spike detection and range-breakout evaluation.
//!
//! # Approach
//! 1. A spike is a candle whose volume clears `multiplier` times the
//!    average of the `window` candles before it
//! 2. A breakout fires when the latest close escapes the highest-high /
//!    lowest-low range of the candles before it AND a fresh spike backs it
//! 3. Stops lean on the candle's own range, targets are 1.5R from entry
//!
//! Everything here is pure over a candle snapshot. The live path and the
//! replay path both call in, so no clocks and no locks.

use serde::Serialize;

use crate::config::StrategyConfig;
use crate::domain::{Candle, TradeDirection};
use crate::error::CoreError;
use crate::utils::{mean, round_to};

/// Profit target distance as a multiple of stop distance.
pub(crate) const REWARD_RISK: f64 = 1.5;

/// Breakout evaluation only cares about the freshest few spikes.
const BREAKOUT_SPIKE_LIMIT: usize = 5;

// ─── Spike Scan ────────────────────────────────────────────────────────────

/// One volume spike, with enough candle context to judge it.
#[derive(Debug, Clone, Serialize)]
pub struct SpikeRecord {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    /// Average volume over the window preceding the spike candle.
    pub avg_v: f64,
    /// `v / avg_v`, the relative-volume score.
    pub ratio: f64,
    /// Candle body direction, a cheap guess at breakout side.
    pub direction_hint: TradeDirection,
}

/// Scan the tail of `candles` for volume spikes, newest last.
///
/// Only the last `window + limit + 5` candles are considered so the scan
/// cost stays flat regardless of how much history is buffered. Returns at
/// most `limit` spikes.
pub fn compute_spikes(
    candles: &[Candle],
    window: usize,
    multiplier: f64,
    limit: usize,
) -> Vec<SpikeRecord> {
    let start = candles.len().saturating_sub(window.saturating_add(limit + 5));
    let buf = &candles[start..];
    if buf.len() < window.max(5) {
        return Vec::new();
    }

    let mut spikes = Vec::new();
    for i in window..buf.len() {
        let volumes: Vec<f64> = buf[i - window..i].iter().map(|c| c.base_volume).collect();
        let avg_v = mean(&volumes);
        let cur = buf[i];
        let ratio = if avg_v > 0.0 { cur.base_volume / avg_v } else { 0.0 };
        if ratio >= multiplier {
            spikes.push(SpikeRecord {
                t: cur.timestamp_ms,
                o: cur.open,
                h: cur.high,
                l: cur.low,
                c: cur.close,
                v: cur.base_volume,
                avg_v,
                ratio,
                direction_hint: if cur.is_bullish() {
                    TradeDirection::Long
                } else {
                    TradeDirection::Short
                },
            });
        }
    }
    spikes.split_off(spikes.len().saturating_sub(limit))
}

// ─── Breakout Evaluation ───────────────────────────────────────────────────

/// A firing breakout with its full trade plan.
#[derive(Debug, Clone, Serialize)]
pub struct BreakoutSignal {
    #[serde(rename = "hasSignal")]
    pub has_signal: bool,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry: f64,
    pub sl: f64,
    pub tp: f64,
    pub lookback: usize,
    pub window: usize,
    pub spike_ratio: f64,
    pub hh: f64,
    pub ll: f64,
    pub confidence: f64,
}

/// Why no trade fired. Levels are attached when they were computable.
#[derive(Debug, Clone, Serialize)]
pub struct BreakoutDecline {
    #[serde(rename = "hasSignal")]
    pub has_signal: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ll: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BreakoutEvaluation {
    Fired(BreakoutSignal),
    Declined(BreakoutDecline),
}

impl BreakoutEvaluation {
    fn declined(reason: &str) -> Self {
        Self::Declined(BreakoutDecline {
            has_signal: false,
            reason: reason.to_string(),
            hh: None,
            ll: None,
            last_close: None,
        })
    }

    pub fn fired(&self) -> Option<&BreakoutSignal> {
        match self {
            Self::Fired(signal) => Some(signal),
            Self::Declined(_) => None,
        }
    }

    pub fn decline_reason(&self) -> Option<&str> {
        match self {
            Self::Fired(_) => None,
            Self::Declined(decline) => Some(&decline.reason),
        }
    }
}

/// Evaluate the latest candle against the prior range.
///
/// Declines (not errors) when history is thin, no spike is fresh, or the
/// close sits inside the range. A decline on range grounds still reports
/// the levels so a caller can see how far away the breakout is.
pub fn breakout_signal(
    symbol: &str,
    candles: &[Candle],
    cfg: &StrategyConfig,
) -> BreakoutEvaluation {
    let needed = cfg.lookback.saturating_add(1).max(cfg.window.saturating_add(1));
    if candles.len() < needed || cfg.lookback < 2 {
        return BreakoutEvaluation::declined("insufficient candles");
    }

    let spikes = compute_spikes(candles, cfg.window, cfg.multiplier, BREAKOUT_SPIKE_LIMIT);
    let Some(last_spike) = spikes.last() else {
        return BreakoutEvaluation::declined("no spikes");
    };

    let cur = candles[candles.len() - 1];
    let (hh, ll) = prior_range(candles, cfg.lookback);
    let entry = cur.close;

    if entry > hh && last_spike.ratio >= cfg.multiplier {
        let sl = (entry - cur.range()).max(ll);
        let risk = entry - sl;
        return BreakoutEvaluation::Fired(plan(
            symbol,
            TradeDirection::Long,
            entry,
            sl,
            entry + REWARD_RISK * risk,
            cfg,
            last_spike.ratio,
            hh,
            ll,
        ));
    }
    if entry < ll && last_spike.ratio >= cfg.multiplier {
        let sl = (entry + cur.range()).min(hh);
        let risk = sl - entry;
        return BreakoutEvaluation::Fired(plan(
            symbol,
            TradeDirection::Short,
            entry,
            sl,
            entry - REWARD_RISK * risk,
            cfg,
            last_spike.ratio,
            hh,
            ll,
        ));
    }

    BreakoutEvaluation::Declined(BreakoutDecline {
        has_signal: false,
        reason: "no breakout".to_string(),
        hh: Some(hh),
        ll: Some(ll),
        last_close: Some(entry),
    })
}

// ─── Range Levels ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RangeLevels {
    pub symbol: String,
    pub lookback: usize,
    pub hh: f64,
    pub ll: f64,
    pub last_close: f64,
}

/// The raw highest-high / lowest-low levels a breakout would measure from.
pub fn range_levels(
    symbol: &str,
    candles: &[Candle],
    lookback: usize,
) -> Result<RangeLevels, CoreError> {
    if candles.len() < lookback.saturating_add(1) || lookback < 2 {
        return Err(CoreError::insufficient("insufficient candles"));
    }
    let (hh, ll) = prior_range(candles, lookback);
    Ok(RangeLevels {
        symbol: symbol.to_string(),
        lookback,
        hh,
        ll,
        last_close: candles[candles.len() - 1].close,
    })
}

// ─── Helper Functions ──────────────────────────────────────────────────────

/// Highest high and lowest low over the last `lookback` candles,
/// excluding the latest one. Caller guarantees `lookback >= 2` and
/// enough candles.
fn prior_range(candles: &[Candle], lookback: usize) -> (f64, f64) {
    let rng = &candles[candles.len() - lookback..];
    let prior = &rng[..rng.len() - 1];
    let hh = prior.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let ll = prior.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    (hh, ll)
}

#[allow(clippy::too_many_arguments)]
fn plan(
    symbol: &str,
    direction: TradeDirection,
    entry: f64,
    sl: f64,
    tp: f64,
    cfg: &StrategyConfig,
    ratio: f64,
    hh: f64,
    ll: f64,
) -> BreakoutSignal {
    BreakoutSignal {
        has_signal: true,
        symbol: symbol.to_string(),
        direction,
        entry: round_to(entry, 8),
        sl: round_to(sl, 8),
        tp: round_to(tp, 8),
        lookback: cfg.lookback,
        window: cfg.window,
        spike_ratio: round_to(ratio, 3),
        hh,
        ll,
        confidence: confidence(ratio, cfg.multiplier),
    }
}

/// Base 0.6, plus 0.1 per ratio point above the threshold, capped at 0.9.
fn confidence(ratio: f64, multiplier: f64) -> f64 {
    0.6 + (0.3f64).min((ratio - multiplier) * 0.1)
}
