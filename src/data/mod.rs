mod history;
mod seed;
mod stream;

pub use history::MarketHistory;
pub use seed::parse_seed_rows;
pub use stream::{ConnPhase, ConnectionHealth, StreamConnector, SubscribedChannels};
