pub mod config;
pub mod evaluator;
pub mod indicators;
pub mod snapshot;

pub use config::{AssetConfig, AssetFileConfig, RiskParams, StrategyMode, StrategyParams};
pub use evaluator::{evaluate, Trend};
pub use snapshot::MarketSnapshot;
