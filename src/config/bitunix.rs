pub struct WsConfig {
    pub public_url: &'static str,
    /// Fixed delay between a dropped connection and the next attempt.
    pub reconnect_delay_sec: u64,
    /// Bitunix expects an application-level ping on this cadence.
    pub ping_interval_sec: u64,
}

pub struct StreamDefaults {
    pub symbol: &'static str,
    /// Kline channel name; the server pushes updates roughly every 500ms.
    pub interval: &'static str,
    pub trade_channel: &'static str,
    pub kline_channel_prefix: &'static str,
}

pub struct HistoryLimits {
    pub max_candles: usize,
    pub max_trades: usize,
}

pub struct BitunixConfig {
    pub ws: WsConfig,
    pub stream: StreamDefaults,
    pub history: HistoryLimits,
}

pub const BITUNIX: BitunixConfig = BitunixConfig {
    ws: WsConfig {
        public_url: "wss://fapi.bitunix.com/public/",
        reconnect_delay_sec: 3,
        ping_interval_sec: 15,
    },
    stream: StreamDefaults {
        symbol: "BTCUSDT",
        interval: "market_kline_1min",
        trade_channel: "trade",
        kline_channel_prefix: "market_kline_",
    },
    history: HistoryLimits {
        max_candles: 500,
        max_trades: 2000,
    },
};
