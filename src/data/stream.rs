//! Live Bitunix websocket feed with auto-reconnect.
//!
//! # Approach
//! 1. One long-lived task owns the connect/read/reconnect cycle
//! 2. Outbound frames funnel through an mpsc writer task, so subscribe,
//!    keepalive pings and manual closes never fight over the sink
//! 3. Inbound klines and trades land in the shared `MarketHistory`
//! 4. A malformed frame is dropped and noted in health, never torn down
//!
//! Connection state lives behind a std `Mutex` that is only touched in
//! short sync blocks, never across an await.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::BITUNIX;
use crate::data::history::MarketHistory;
use crate::data::seed::json_number;
use crate::domain::{Candle, TradeTick};
use crate::error::CoreError;
use crate::utils::{now_ms, now_secs};

/// Where the connector currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnPhase {
    Disconnected,
    Connecting,
    Open,
    Subscribed,
    Error,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscribedChannels {
    pub kline: bool,
    pub trade: bool,
}

/// Point-in-time health snapshot, safe to hand to any caller.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub connected: bool,
    pub phase: ConnPhase,
    /// Timestamp of the last frame that parsed, from its `ts` field or
    /// the arrival time.
    pub last_msg_ts: Option<i64>,
    pub last_error: Option<String>,
    pub loop_alive: bool,
    pub url: &'static str,
    pub subscribed: SubscribedChannels,
    pub symbol: String,
    pub interval: String,
}

#[derive(Debug)]
struct ConnState {
    phase: ConnPhase,
    connected: bool,
    last_msg_ts: Option<i64>,
    last_error: Option<String>,
    kline_subscribed: bool,
    trade_subscribed: bool,
    loop_alive: bool,
    symbol: String,
    interval: String,
}

enum WriterCmd {
    Frame(String),
    Close,
}

/// Owns the websocket lifecycle and feeds `MarketHistory`.
pub struct StreamConnector {
    history: Arc<MarketHistory>,
    state: Mutex<ConnState>,
    /// Sender into the writer task of the current connection, if any.
    writer: Mutex<Option<mpsc::UnboundedSender<WriterCmd>>>,
}

impl StreamConnector {
    pub fn new(history: Arc<MarketHistory>) -> Self {
        Self {
            history,
            state: Mutex::new(ConnState {
                phase: ConnPhase::Disconnected,
                connected: false,
                last_msg_ts: None,
                last_error: None,
                kline_subscribed: false,
                trade_subscribed: false,
                loop_alive: false,
                symbol: BITUNIX.stream.symbol.to_string(),
                interval: BITUNIX.stream.interval.to_string(),
            }),
            writer: Mutex::new(None),
        }
    }

    /// Connect / read / reconnect forever. Spawn this once.
    pub async fn run(self: Arc<Self>) {
        {
            let mut st = self.state.lock().unwrap();
            st.loop_alive = true;
        }
        loop {
            // Target is re-read every cycle so update_target lands here.
            let (symbol, interval) = self.target();
            {
                let mut st = self.state.lock().unwrap();
                st.phase = ConnPhase::Connecting;
                st.connected = false;
                st.kline_subscribed = false;
                st.trade_subscribed = false;
            }
            log::info!("[stream] connecting to {} for {symbol}", BITUNIX.ws.public_url);

            match connect_async(BITUNIX.ws.public_url).await {
                Ok((ws, _resp)) => {
                    {
                        let mut st = self.state.lock().unwrap();
                        st.phase = ConnPhase::Open;
                        st.connected = true;
                    }
                    let (mut sink, mut read) = ws.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<WriterCmd>();
                    {
                        let mut slot = self.writer.lock().unwrap();
                        *slot = Some(tx.clone());
                    }

                    // Writer task: the only owner of the sink.
                    tokio::spawn(async move {
                        while let Some(cmd) = rx.recv().await {
                            match cmd {
                                WriterCmd::Frame(text) => {
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                WriterCmd::Close => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                        }
                    });

                    // Keepalive task: dies with the connection.
                    let ping_self = Arc::clone(&self);
                    let ping_tx = tx.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::time::sleep(Duration::from_secs(BITUNIX.ws.ping_interval_sec))
                                .await;
                            if !ping_self.is_connected() {
                                break;
                            }
                            if ping_tx.send(WriterCmd::Frame(ping_frame(now_secs()))).is_err() {
                                break;
                            }
                        }
                    });

                    let sent = tx
                        .send(WriterCmd::Frame(subscribe_frame(&symbol, &interval)))
                        .is_ok();
                    if sent {
                        let mut st = self.state.lock().unwrap();
                        st.phase = ConnPhase::Subscribed;
                        st.kline_subscribed = true;
                        st.trade_subscribed = true;
                        log::info!("[stream] subscribed {symbol} to {interval} + trades");
                    }

                    while let Some(msg) = read.next().await {
                        match msg {
                            Ok(Message::Text(txt)) => self.handle_frame(&symbol, txt.as_str()),
                            Ok(Message::Close(_)) => {
                                let mut st = self.state.lock().unwrap();
                                st.phase = ConnPhase::Closed;
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                let mut st = self.state.lock().unwrap();
                                st.phase = ConnPhase::Error;
                                st.last_error = Some(format!("read error: {e}"));
                                log::warn!("[stream] read error: {e}");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    let mut st = self.state.lock().unwrap();
                    st.phase = ConnPhase::Error;
                    st.last_error = Some(format!("connect error: {e}"));
                    log::warn!("[stream] connect error: {e}");
                }
            }

            {
                let mut slot = self.writer.lock().unwrap();
                *slot = None;
            }
            {
                let mut st = self.state.lock().unwrap();
                if matches!(st.phase, ConnPhase::Open | ConnPhase::Subscribed) {
                    st.phase = ConnPhase::Closed;
                }
                st.connected = false;
                st.kline_subscribed = false;
                st.trade_subscribed = false;
            }

            log::info!(
                "[stream] disconnected, retrying in {}s",
                BITUNIX.ws.reconnect_delay_sec
            );
            tokio::time::sleep(Duration::from_secs(BITUNIX.ws.reconnect_delay_sec)).await;
            {
                let mut st = self.state.lock().unwrap();
                st.phase = ConnPhase::Disconnected;
            }
        }
    }

    pub fn health(&self) -> ConnectionHealth {
        let st = self.state.lock().unwrap();
        ConnectionHealth {
            connected: st.connected,
            phase: st.phase,
            last_msg_ts: st.last_msg_ts,
            last_error: st.last_error.clone(),
            loop_alive: st.loop_alive,
            url: BITUNIX.ws.public_url,
            subscribed: SubscribedChannels {
                kline: st.kline_subscribed,
                trade: st.trade_subscribed,
            },
            symbol: st.symbol.clone(),
            interval: st.interval.clone(),
        }
    }

    /// Change what the next connection cycle subscribes to. The current
    /// socket keeps running; pair with `force_reconnect` to switch now.
    pub fn update_target(&self, symbol: &str, interval: &str) -> Result<(), CoreError> {
        let symbol = symbol.trim();
        let interval = interval.trim();
        if symbol.is_empty() {
            return Err(CoreError::validation("symbol must not be empty"));
        }
        if interval.is_empty() {
            return Err(CoreError::validation("interval must not be empty"));
        }
        let mut st = self.state.lock().unwrap();
        st.symbol = symbol.to_string();
        st.interval = interval.to_string();
        Ok(())
    }

    /// Ask the current connection to close so the loop dials again.
    /// Best-effort: with no live transport this is just a note in health.
    pub fn force_reconnect(&self) {
        {
            let mut st = self.state.lock().unwrap();
            st.last_error = Some("manual reconnect requested".to_string());
        }
        let slot = self.writer.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            let _ = tx.send(WriterCmd::Close);
        }
    }

    /// Drop the recorded last error without touching the connection.
    pub fn clear_last_error(&self) {
        let mut st = self.state.lock().unwrap();
        st.last_error = None;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn target(&self) -> (String, String) {
        let st = self.state.lock().unwrap();
        (st.symbol.clone(), st.interval.clone())
    }

    /// Route one inbound text frame. Bad frames update health and are
    /// dropped; the read loop never stops for them. Only frames that
    /// parse advance `last_msg_ts`.
    fn handle_frame(&self, fallback_symbol: &str, raw: &str) {
        let msg: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                self.record_parse_error(format!("parse error: {e}"));
                return;
            }
        };
        {
            let stamp = msg
                .get("ts")
                .and_then(json_number)
                .map(|f| f as i64)
                .unwrap_or_else(now_ms);
            let mut st = self.state.lock().unwrap();
            st.last_msg_ts = Some(stamp);
        }
        let Some(channel) = msg.get("ch").and_then(|v| v.as_str()) else {
            // op acks (pong etc.) have no channel and carry no data.
            return;
        };
        let symbol = msg
            .get("symbol")
            .and_then(|v| v.as_str())
            .unwrap_or(fallback_symbol)
            .to_string();

        if channel.starts_with(BITUNIX.stream.kline_channel_prefix) {
            match parse_kline(&msg) {
                Ok(candle) => self.history.push_candle(&symbol, candle),
                Err(e) => self.record_parse_error(format!("parse error: {e}")),
            }
        } else if channel == BITUNIX.stream.trade_channel {
            match msg.get("data").and_then(|v| v.as_array()) {
                Some(rows) => {
                    for row in rows {
                        if let Some(tick) = parse_trade_row(row) {
                            self.history.push_trade(&symbol, tick);
                        }
                    }
                }
                None => self.record_parse_error("parse error: trade data is not an array".into()),
            }
        }
    }

    fn record_parse_error(&self, message: String) {
        log::debug!("[stream] {message}");
        let mut st = self.state.lock().unwrap();
        st.last_error = Some(message);
    }
}

// ─── Helper Functions ──────────────────────────────────────────────────────

/// One frame subscribes both channels for the symbol.
fn subscribe_frame(symbol: &str, interval: &str) -> String {
    json!({
        "op": "subscribe",
        "args": [
            {"symbol": symbol, "ch": interval},
            {"symbol": symbol, "ch": BITUNIX.stream.trade_channel},
        ],
    })
    .to_string()
}

fn ping_frame(epoch_secs: i64) -> String {
    json!({"op": "ping", "ping": epoch_secs}).to_string()
}

/// Kline payloads quote numbers as strings. A missing field reads as 0.0,
/// a present-but-unparsable one rejects the whole candle.
fn parse_kline(msg: &Value) -> anyhow::Result<Candle> {
    let data = msg
        .get("data")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("kline data is not an object"))?;
    let timestamp_ms = msg
        .get("ts")
        .and_then(json_number)
        .map(|f| f as i64)
        .unwrap_or_else(now_ms);
    Ok(Candle::new(
        timestamp_ms,
        kline_field(data, "o")?,
        kline_field(data, "h")?,
        kline_field(data, "l")?,
        kline_field(data, "c")?,
        kline_field(data, "b")?,
    ))
}

fn kline_field(data: &serde_json::Map<String, Value>, key: &str) -> anyhow::Result<f64> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(v) => json_number(v).ok_or_else(|| anyhow::anyhow!("bad kline field '{key}'")),
    }
}

/// One trade row; `None` skips just that row.
fn parse_trade_row(row: &Value) -> Option<TradeTick> {
    let obj = row.as_object()?;
    let timestamp_ms = match obj.get("t") {
        Some(v) => json_number(v)? as i64,
        None => now_ms(),
    };
    Some(TradeTick {
        timestamp_ms,
        price: obj.get("p").and_then(json_number)?,
        volume: obj.get("v").and_then(json_number)?,
        side: obj
            .get("s")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> (Arc<MarketHistory>, StreamConnector) {
        let history = Arc::new(MarketHistory::with_limits(10, 10));
        let conn = StreamConnector::new(Arc::clone(&history));
        (history, conn)
    }

    #[test]
    fn starts_disconnected_with_defaults() {
        let (_, conn) = connector();
        let health = conn.health();
        assert_eq!(health.phase, ConnPhase::Disconnected);
        assert!(!health.connected);
        assert!(!health.loop_alive);
        assert_eq!(health.symbol, "BTCUSDT");
        assert_eq!(health.interval, "market_kline_1min");
        assert!(!health.subscribed.kline);
    }

    #[test]
    fn subscribe_frame_carries_both_channels() {
        let parsed: Value = serde_json::from_str(&subscribe_frame("BTCUSDT", "market_kline_1min"))
            .unwrap();
        assert_eq!(parsed["op"], "subscribe");
        let args = parsed["args"].as_array().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0]["symbol"], "BTCUSDT");
        assert_eq!(args[0]["ch"], "market_kline_1min");
        assert_eq!(args[1]["ch"], "trade");
    }

    #[test]
    fn ping_frame_shape() {
        let parsed: Value = serde_json::from_str(&ping_frame(1_700_000_000)).unwrap();
        assert_eq!(parsed["op"], "ping");
        assert_eq!(parsed["ping"], 1_700_000_000);
    }

    #[test]
    fn kline_frame_lands_in_history() {
        let (history, conn) = connector();
        conn.handle_frame(
            "BTCUSDT",
            r#"{"ch":"market_kline_1min","ts":1700000000000,
                "data":{"o":"100.5","h":"110","l":"99","c":"105","b":"1234.5"}}"#,
        );
        let candles = history.candles("BTCUSDT");
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, 100.5);
        assert_eq!(candles[0].base_volume, 1234.5);
        assert_eq!(candles[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(conn.health().last_msg_ts, Some(1_700_000_000_000));
        assert!(conn.health().last_error.is_none());
    }

    #[test]
    fn kline_missing_field_reads_zero() {
        let (history, conn) = connector();
        conn.handle_frame(
            "BTCUSDT",
            r#"{"ch":"market_kline_1min","data":{"o":"100","h":"110","l":"99","c":"105"}}"#,
        );
        let candles = history.candles("BTCUSDT");
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].base_volume, 0.0);
    }

    #[test]
    fn kline_bad_field_drops_candle_and_records_error() {
        let (history, conn) = connector();
        conn.handle_frame(
            "BTCUSDT",
            r#"{"ch":"market_kline_1min","data":{"o":"oops","h":"1","l":"1","c":"1","b":"1"}}"#,
        );
        assert!(history.candles("BTCUSDT").is_empty());
        let err = conn.health().last_error.unwrap();
        assert!(err.contains("parse error"));
        assert!(err.contains("'o'"));
    }

    /// Garbage on the wire must not read as feed liveness.
    #[test]
    fn non_json_frame_records_error_without_marking_liveness() {
        let (history, conn) = connector();
        conn.handle_frame("BTCUSDT", "definitely not json");
        assert!(history.candles("BTCUSDT").is_empty());
        assert!(conn.health().last_error.unwrap().contains("parse error"));
        assert!(conn.health().last_msg_ts.is_none());
    }

    #[test]
    fn clear_last_error_leaves_the_rest_of_health_alone() {
        let (_history, conn) = connector();
        conn.handle_frame("BTCUSDT", r#"{"op":"pong","pong":123}"#);
        conn.handle_frame("BTCUSDT", "definitely not json");
        assert!(conn.health().last_error.is_some());
        assert!(conn.health().last_msg_ts.is_some());

        conn.clear_last_error();
        let health = conn.health();
        assert!(health.last_error.is_none());
        assert!(health.last_msg_ts.is_some());
    }

    #[test]
    fn trade_rows_skip_bad_entries() {
        let (history, conn) = connector();
        conn.handle_frame(
            "BTCUSDT",
            r#"{"ch":"trade","data":[
                {"t":1,"p":"100.0","v":"0.5","s":"buy"},
                {"t":2,"p":"nope","v":"0.5","s":"sell"},
                {"t":3,"p":"101.0","v":"0.25","s":"sell"}]}"#,
        );
        let trades = history.recent_trades("BTCUSDT", 10);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, 100.0);
        assert_eq!(trades[1].side, "sell");
    }

    #[test]
    fn message_symbol_overrides_fallback() {
        let (history, conn) = connector();
        conn.handle_frame(
            "BTCUSDT",
            r#"{"ch":"trade","symbol":"ETHUSDT","data":[{"t":1,"p":"10","v":"1","s":"buy"}]}"#,
        );
        assert_eq!(history.recent_trades("ETHUSDT", 10).len(), 1);
        assert!(history.recent_trades("BTCUSDT", 10).is_empty());
    }

    /// Acks carry no data but still count as feed liveness.
    #[test]
    fn pong_ack_is_ignored() {
        let (history, conn) = connector();
        conn.handle_frame("BTCUSDT", r#"{"op":"pong","pong":123}"#);
        assert!(history.candles("BTCUSDT").is_empty());
        assert!(conn.health().last_error.is_none());
        assert!(conn.health().last_msg_ts.is_some());
    }

    #[test]
    fn update_target_validates_and_applies() {
        let (_, conn) = connector();
        assert!(conn.update_target("  ", "market_kline_1min").is_err());
        assert!(conn.update_target("ETHUSDT", "").is_err());
        conn.update_target("ETHUSDT", "market_kline_5min").unwrap();
        let health = conn.health();
        assert_eq!(health.symbol, "ETHUSDT");
        assert_eq!(health.interval, "market_kline_5min");
    }

    #[test]
    fn force_reconnect_without_transport_only_notes() {
        let (_, conn) = connector();
        conn.force_reconnect();
        assert_eq!(
            conn.health().last_error.as_deref(),
            Some("manual reconnect requested")
        );
        assert_eq!(conn.health().phase, ConnPhase::Disconnected);
    }
}
