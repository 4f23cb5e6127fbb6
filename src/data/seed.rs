//! Tolerant parsing for user-supplied seed candles.
//!
//! Seed rows arrive as loose JSON from scripts and exported files, so the
//! field names vary (`t`/`ts`/`time`, `o`/`open`, ...) and numbers are often
//! strings. A row missing a field or failing to coerce is skipped, never
//! fatal.

use serde_json::Value;

use crate::domain::Candle;

const TIME_KEYS: [&str; 3] = ["t", "ts", "time"];
const OPEN_KEYS: [&str; 2] = ["o", "open"];
const HIGH_KEYS: [&str; 2] = ["h", "high"];
const LOW_KEYS: [&str; 2] = ["l", "low"];
const CLOSE_KEYS: [&str; 2] = ["c", "close"];
// Bitunix kline payloads call base volume "b".
const VOLUME_KEYS: [&str; 3] = ["v", "volume", "b"];

/// Parse seed rows into candles, dropping rows that do not coerce.
/// Returns the parsed candles plus how many rows were skipped.
pub fn parse_seed_rows(rows: &[Value]) -> (Vec<Candle>, usize) {
    let mut parsed = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match parse_row(row) {
            Some(candle) => parsed.push(candle),
            None => skipped += 1,
        }
    }
    (parsed, skipped)
}

fn parse_row(row: &Value) -> Option<Candle> {
    let obj = row.as_object()?;
    Some(Candle::new(
        number_field(obj, &TIME_KEYS)? as i64,
        number_field(obj, &OPEN_KEYS)?,
        number_field(obj, &HIGH_KEYS)?,
        number_field(obj, &LOW_KEYS)?,
        number_field(obj, &CLOSE_KEYS)?,
        number_field(obj, &VOLUME_KEYS)?,
    ))
}

/// A missing or non-numeric field poisons the whole row.
fn number_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f64> {
    first_present(obj, keys).and_then(json_number)
}

fn first_present<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

/// Coerce a JSON number or numeric string to f64.
pub(crate) fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_and_long_field_names_both_parse() {
        let rows = vec![
            json!({"t": 1, "o": 10.0, "h": 12.0, "l": 9.0, "c": 11.0, "v": 100.0}),
            json!({"time": 2, "open": "10.5", "high": "12.5", "low": "9.5", "close": "11.5", "volume": "50"}),
        ];
        let (candles, skipped) = parse_seed_rows(&rows);
        assert_eq!(skipped, 0);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].timestamp_ms, 2);
        assert_eq!(candles[1].open, 10.5);
        assert_eq!(candles[1].base_volume, 50.0);
    }

    #[test]
    fn bitunix_b_key_counts_as_volume() {
        let rows = vec![json!({"t": 5, "o": 1, "h": 2, "l": 0.5, "c": 1.5, "b": "42.0"})];
        let (candles, _) = parse_seed_rows(&rows);
        assert_eq!(candles[0].base_volume, 42.0);
    }

    /// A bare close with no open/high/low/volume must not become a candle
    /// full of zero prices, and a row without any timestamp key is just as
    /// incomplete.
    #[test]
    fn rows_missing_any_field_are_skipped() {
        let rows = vec![
            json!({"t": 7, "c": 99.0}),
            json!({"o": 1, "h": 2, "l": 1, "c": 1.5, "v": 3}),
            json!({"t": 8, "o": 1, "h": 2, "l": 1, "c": 1.5, "v": 3}),
        ];
        let (candles, skipped) = parse_seed_rows(&rows);
        assert_eq!(skipped, 2);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp_ms, 8);
    }

    #[test]
    fn garbage_rows_are_skipped_not_fatal() {
        let rows = vec![
            json!({"t": 1, "o": "not a price", "h": 2, "l": 1, "c": 1.5, "v": 3}),
            json!("not an object"),
            json!({"t": 2, "o": 1, "h": 2, "l": 1, "c": 1.5, "v": 3}),
        ];
        let (candles, skipped) = parse_seed_rows(&rows);
        assert_eq!(candles.len(), 1);
        assert_eq!(skipped, 2);
        assert_eq!(candles[0].timestamp_ms, 2);
    }

}
