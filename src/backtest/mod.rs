//! Offline replay of candle series through the strategy engine
pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestMetrics, DenialCounts, ExitCounts};
pub use runner::{BacktestReport, BacktestRunner};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
