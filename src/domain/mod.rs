// Domain types and value objects
mod candle;
mod direction;

// Re-export commonly used types
pub use candle::{Candle, TradeTick};
pub use direction::{
    OrderKind, OrderSide, OrderStatus, PositionStatus, TieBreaker, TradeDirection, TradeOutcome,
};
