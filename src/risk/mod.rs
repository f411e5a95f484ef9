// Risk management module
pub mod manager;

pub use manager::{Authorization, DenialReason, HaltDecision, PnlState, PoolState, RiskManager};
