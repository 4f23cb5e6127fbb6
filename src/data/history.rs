//! In-memory market history, bounded per symbol.
//!
//! Every symbol owns two FIFO rings (candles and raw trades). Rings drop
//! their oldest entry once full, so memory stays flat no matter how long a
//! stream runs. Readers always get copied-out snapshots; nothing hands out
//! a reference into the locked map.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::config::BITUNIX;
use crate::domain::{Candle, TradeTick};

#[derive(Debug, Default)]
struct SymbolHistory {
    candles: VecDeque<Candle>,
    trades: VecDeque<TradeTick>,
}

/// Shared store behind the stream connector and every read path.
///
/// One mutex guards the whole map. Lock hold times are short (push one
/// row or copy one ring) and nothing async ever runs under the lock.
#[derive(Debug)]
pub struct MarketHistory {
    inner: Mutex<HashMap<String, SymbolHistory>>,
    max_candles: usize,
    max_trades: usize,
}

impl Default for MarketHistory {
    fn default() -> Self {
        Self::with_limits(BITUNIX.history.max_candles, BITUNIX.history.max_trades)
    }
}

impl MarketHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom ring sizes, used by tests that want tiny rings.
    pub fn with_limits(max_candles: usize, max_trades: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_candles,
            max_trades,
        }
    }

    /// Append a candle, evicting from the front once the ring is full.
    /// First sight of a symbol creates its entry.
    pub fn push_candle(&self, symbol: &str, candle: Candle) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.candles.push_back(candle);
        while entry.candles.len() > self.max_candles {
            entry.candles.pop_front();
        }
    }

    pub fn push_trade(&self, symbol: &str, tick: TradeTick) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.trades.push_back(tick);
        while entry.trades.len() > self.max_trades {
            entry.trades.pop_front();
        }
    }

    /// Copy of the full candle ring, oldest first.
    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.candles.iter().copied().collect()
    }

    /// Copy of the last `limit` candles, oldest first.
    pub fn recent_candles(&self, symbol: &str, limit: usize) -> Vec<Candle> {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        let skip = entry.candles.len().saturating_sub(limit);
        entry.candles.iter().skip(skip).copied().collect()
    }

    /// Copy of the last `limit` trades, oldest first.
    pub fn recent_trades(&self, symbol: &str, limit: usize) -> Vec<TradeTick> {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        let skip = entry.trades.len().saturating_sub(limit);
        entry.trades.iter().skip(skip).cloned().collect()
    }

    /// Drop both rings for a symbol. The key itself stays registered so a
    /// clear during live streaming never races symbol creation.
    pub fn clear(&self, symbol: &str) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        entry.candles.clear();
        entry.trades.clear();
    }

    /// `(candles, trades)` currently buffered for a symbol.
    pub fn counts(&self, symbol: &str) -> (usize, usize) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        (entry.candles.len(), entry.trades.len())
    }

    /// Bulk-load candles, optionally replacing whatever is buffered.
    /// Returns `(added, total)` for the symbol.
    pub fn seed_candles(&self, symbol: &str, rows: Vec<Candle>, replace: bool) -> (usize, usize) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(symbol.to_string()).or_default();
        if replace {
            entry.candles.clear();
        }
        let added = rows.len();
        for candle in rows {
            entry.candles.push_back(candle);
            while entry.candles.len() > self.max_candles {
                entry.candles.pop_front();
            }
        }
        (added, entry.candles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(t: i64, close: f64) -> Candle {
        Candle::new(t, close, close, close, close, 1.0)
    }

    #[test]
    fn candle_ring_evicts_oldest() {
        let store = MarketHistory::with_limits(3, 3);
        for i in 0..5 {
            store.push_candle("BTCUSDT", candle(i, i as f64));
        }
        let snap = store.candles("BTCUSDT");
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].timestamp_ms, 2);
        assert_eq!(snap[2].timestamp_ms, 4);
    }

    #[test]
    fn snapshots_are_copies() {
        let store = MarketHistory::with_limits(10, 10);
        store.push_candle("BTCUSDT", candle(1, 100.0));
        let snap = store.candles("BTCUSDT");
        store.push_candle("BTCUSDT", candle(2, 101.0));
        assert_eq!(snap.len(), 1);
        assert_eq!(store.candles("BTCUSDT").len(), 2);
    }

    #[test]
    fn recent_candles_takes_the_tail() {
        let store = MarketHistory::with_limits(10, 10);
        for i in 0..6 {
            store.push_candle("ETHUSDT", candle(i, i as f64));
        }
        let tail = store.recent_candles("ETHUSDT", 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].timestamp_ms, 4);
        assert_eq!(tail[1].timestamp_ms, 5);
    }

    #[test]
    fn clear_empties_rings_but_keeps_the_symbol() {
        let store = MarketHistory::with_limits(10, 10);
        store.push_candle("BTCUSDT", candle(1, 100.0));
        store.push_trade(
            "BTCUSDT",
            TradeTick {
                timestamp_ms: 1,
                price: 100.0,
                volume: 0.5,
                side: "buy".into(),
            },
        );
        store.clear("BTCUSDT");
        assert_eq!(store.counts("BTCUSDT"), (0, 0));
        store.push_candle("BTCUSDT", candle(2, 101.0));
        assert_eq!(store.counts("BTCUSDT"), (1, 0));
    }

    #[test]
    fn unknown_symbol_reads_as_empty() {
        let store = MarketHistory::new();
        assert!(store.candles("DOGEUSDT").is_empty());
        assert_eq!(store.counts("DOGEUSDT"), (0, 0));
    }

    #[test]
    fn seed_replace_and_append() {
        let store = MarketHistory::with_limits(10, 10);
        store.push_candle("BTCUSDT", candle(1, 100.0));

        let (added, total) = store.seed_candles("BTCUSDT", vec![candle(2, 1.0), candle(3, 2.0)], false);
        assert_eq!((added, total), (2, 3));

        let (added, total) = store.seed_candles("BTCUSDT", vec![candle(9, 5.0)], true);
        assert_eq!((added, total), (1, 1));
        assert_eq!(store.candles("BTCUSDT")[0].timestamp_ms, 9);
    }

    #[test]
    fn seed_respects_ring_capacity() {
        let store = MarketHistory::with_limits(2, 2);
        let rows = (0..5).map(|i| candle(i, i as f64)).collect();
        let (added, total) = store.seed_candles("BTCUSDT", rows, true);
        assert_eq!(added, 5);
        assert_eq!(total, 2);
        assert_eq!(store.candles("BTCUSDT")[0].timestamp_ms, 3);
    }
}
