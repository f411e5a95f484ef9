use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::execution::ExecutorState;

/// Configuration validation and loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("long_threshold {long} and short_threshold {short} must satisfy 0 <= long < short <= 1")]
    InvalidThresholdRange { long: f64, short: f64 },

    #[error("bollinger_length must be at least 2, got {0}")]
    BollingerLengthTooShort(usize),

    #[error("std_dev_multiplier must be positive, got {0}")]
    InvalidStdDevMultiplier(f64),

    #[error("leverage must be at least 1, got {0}")]
    InvalidLeverage(u32),

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("max_executors must be at least 1")]
    ZeroMaxExecutors,

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("candle_retention {retention} is smaller than bollinger_length {bollinger_length}")]
    RetentionTooSmall {
        retention: usize,
        bollinger_length: usize,
    },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors surfaced by the strategy engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("out-of-order data: received {received}, last accepted {last}")]
    OutOfOrderData {
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("invalid market data at {at}: {reason}")]
    InvalidMarketData {
        at: DateTime<Utc>,
        reason: &'static str,
    },

    #[error("configuration is locked while {open} executor(s) are live")]
    ConfigLockedWhileActive { open: usize },

    #[error("executor {0} not found")]
    ExecutorNotFound(Uuid),

    #[error("executor {id} cannot {action} from state {from:?}")]
    InvalidTransition {
        id: Uuid,
        from: ExecutorState,
        action: &'static str,
    },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("strategy instance is closed")]
    InstanceClosed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
