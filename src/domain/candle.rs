use serde::{Deserialize, Serialize};

// Serialized field names stay in the feed's short form (t/o/h/l/c/v) so the
// external layer and seed payloads share one shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Server timestamp in epoch milliseconds (arrival order, not deduped).
    #[serde(rename = "t")]
    pub timestamp_ms: i64,

    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,

    /// Base-asset volume for the bucket.
    #[serde(rename = "v")]
    pub base_volume: f64,
}

impl Candle {
    pub fn new(timestamp_ms: i64, open: f64, high: f64, low: f64, close: f64, base_volume: f64) -> Self {
        Candle {
            timestamp_ms,
            open,
            high,
            low,
            close,
            base_volume,
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    // Full candle range, the ATR-lite used for stop placement
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// One executed trade from the public trade channel. The side tag is kept
/// verbatim as the feed sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "v")]
    pub volume: f64,
    #[serde(rename = "s")]
    pub side: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_when_close_at_or_above_open() {
        let up = Candle::new(0, 10.0, 12.0, 9.0, 11.0, 1.0);
        let flat = Candle::new(0, 10.0, 12.0, 9.0, 10.0, 1.0);
        let down = Candle::new(0, 10.0, 12.0, 9.0, 9.5, 1.0);
        assert!(up.is_bullish());
        assert!(flat.is_bullish());
        assert!(!down.is_bullish());
    }

    #[test]
    fn serializes_with_feed_field_names() {
        let c = Candle::new(1_700_000_000_000, 1.0, 2.0, 0.5, 1.5, 42.0);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["t"], 1_700_000_000_000i64);
        assert_eq!(json["o"], 1.0);
        assert_eq!(json["v"], 42.0);
    }
}
