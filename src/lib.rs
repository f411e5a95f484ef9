// Core modules
pub mod backtest;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod pnl;
pub mod risk;
pub mod runner;
pub mod settings;
pub mod strategy;

// Re-export commonly used types
pub use engine::{EngineStatus, ShutdownReport, StrategyEngine, TickReport};
pub use error::{ConfigError, EngineError};
pub use models::*;
pub use runner::{FeedEvent, InstanceHandle};
pub use settings::{EngineConfig, RiskConfig, StrategyConfig};

// Error handling
pub use error::Result;
