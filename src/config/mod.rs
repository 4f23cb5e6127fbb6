mod bitunix;
mod strategy;

pub use bitunix::BITUNIX;
pub use strategy::{find_preset, preset_names, StrategyConfig, PRESETS};
