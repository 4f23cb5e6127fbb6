mod metrics;
mod orders;
mod positions;

pub use metrics::{portfolio_summary, PortfolioSummary};
pub use orders::{OrderLedger, PaperOrder};
pub use positions::{
    size_by_risk, PaperPosition, PositionLedger, PositionSizing, PositionView,
};
