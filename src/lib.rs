#![allow(clippy::too_many_arguments)]
#![allow(clippy::collapsible_if)]

// Core modules
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod models;
pub mod utils;

// Re-export the types most callers start from (binaries, integration tests)
pub use config::{StrategyConfig, BITUNIX};
pub use engine::ScoutEngine;
pub use error::CoreError;
