//! Tunable knobs for the spike/breakout strategy.
//!
//! One live copy sits behind the engine facade; backtests and grid runs
//! take value snapshots so a concurrent tweak never bleeds into a replay.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Parameters shared by the live signal path and the replay path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Rolling candles used for the average-volume baseline.
    pub window: usize,
    /// Volume must exceed `multiplier * average` to count as a spike.
    pub multiplier: f64,
    /// Candles scanned for the highest-high / lowest-low range.
    pub lookback: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window: 20,
            multiplier: 2.5,
            lookback: 20,
        }
    }
}

impl StrategyConfig {
    /// Overwrite only the recognised keys present in `patch`.
    ///
    /// Values arrive as loose JSON (numbers or numeric strings). Anything
    /// that fails coercion is ignored rather than rejected, so a sloppy
    /// client can never wedge the config into an invalid state.
    pub fn apply_partial(&mut self, patch: &serde_json::Value) {
        if let Some(v) = patch.get("window").and_then(coerce_usize) {
            self.window = v;
        }
        if let Some(v) = patch.get("multiplier").and_then(coerce_f64) {
            self.multiplier = v;
        }
        if let Some(v) = patch.get("lookback").and_then(coerce_usize) {
            self.lookback = v;
        }
    }
}

/// Named starting points, ordered mild to strict.
pub const PRESETS: [(&str, StrategyConfig); 3] = [
    (
        "aggressive",
        StrategyConfig {
            window: 5,
            multiplier: 1.3,
            lookback: 10,
        },
    ),
    (
        "balanced",
        StrategyConfig {
            window: 10,
            multiplier: 1.6,
            lookback: 20,
        },
    ),
    (
        "conservative",
        StrategyConfig {
            window: 20,
            multiplier: 2.0,
            lookback: 30,
        },
    ),
];

pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|(name, _)| *name).collect()
}

pub fn find_preset(name: &str) -> Result<StrategyConfig, CoreError> {
    PRESETS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, cfg)| *cfg)
        .ok_or_else(|| {
            CoreError::validation(format!(
                "unknown preset '{name}' (available: {})",
                preset_names().join(", ")
            ))
        })
}

// ─── Helper Functions ──────────────────────────────────────────────────────

/// Upper bound on patched window/lookback values. Far beyond any candle
/// ring, and small enough that downstream index math cannot overflow.
const MAX_BARS: usize = 1_000_000;

/// Integers accept whole numbers, truncating floats and digit strings.
/// Anything above `MAX_BARS` clamps down to it.
fn coerce_usize(value: &serde_json::Value) -> Option<usize> {
    let parsed = match value {
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.trunc() as u64)
            }
        }
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.map(|u| u.min(MAX_BARS as u64) as usize)
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
