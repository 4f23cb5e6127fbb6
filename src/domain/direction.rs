use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// Anything that is not explicitly "short" trades long, matching the
    /// permissive operator inputs.
    pub fn from_loose(s: &str) -> Self {
        if s.eq_ignore_ascii_case("short") {
            TradeDirection::Short
        } else {
            TradeDirection::Long
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn from_loose(s: &str) -> Self {
        if s.eq_ignore_ascii_case("sell") {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    pub fn from_loose(s: &str) -> Self {
        if s.eq_ignore_ascii_case("limit") {
            OrderKind::Limit
        } else {
            OrderKind::Market
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// How a simulated backtest entry resolved within its horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
    /// Horizon exhausted without touching either level.
    Open,
}

/// Resolution rule when one bar crosses both stop-loss and take-profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TieBreaker {
    #[default]
    SlWins,
    TpWins,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn loose_parsing_defaults_to_long_and_buy() {
        assert_eq!(TradeDirection::from_loose("short"), TradeDirection::Short);
        assert_eq!(TradeDirection::from_loose("SHORT"), TradeDirection::Short);
        assert_eq!(TradeDirection::from_loose("anything"), TradeDirection::Long);
        assert_eq!(OrderSide::from_loose("sell"), OrderSide::Sell);
        assert_eq!(OrderSide::from_loose(""), OrderSide::Buy);
    }

    #[test]
    fn tie_breaker_round_trips_snake_case() {
        assert_eq!(TieBreaker::from_str("tp_wins").unwrap(), TieBreaker::TpWins);
        assert_eq!(TieBreaker::SlWins.to_string(), "sl_wins");
        let json = serde_json::to_string(&TieBreaker::TpWins).unwrap();
        assert_eq!(json, "\"tp_wins\"");
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&OrderStatus::Canceled).unwrap(), "\"canceled\"");
        assert_eq!(serde_json::to_string(&TradeOutcome::Open).unwrap(), "\"open\"");
    }
}
