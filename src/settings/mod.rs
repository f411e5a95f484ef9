//! Strategy and risk configuration
//!
//! Values are loaded from an optional TOML file layered with `BANDBOT__*`
//! environment variables, e.g. `BANDBOT__STRATEGY__LEVERAGE=10`. Every
//! configuration goes through [`EngineConfig::validate`] before an engine
//! accepts it.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::PositionMode;
use crate::strategy::signals::validate_thresholds;

/// Upper bound for cooldowns and time limits (ten years)
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Whole seconds as a `Duration`, saturating instead of overflowing
pub fn duration_from_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Candle interval of the traded series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub fn minutes(self) -> i64 {
        match self {
            CandleInterval::OneMinute => 1,
            CandleInterval::ThreeMinutes => 3,
            CandleInterval::FiveMinutes => 5,
            CandleInterval::FifteenMinutes => 15,
            CandleInterval::ThirtyMinutes => 30,
            CandleInterval::OneHour => 60,
            CandleInterval::FourHours => 240,
            CandleInterval::OneDay => 1440,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }
}

/// Trailing stop parameters, as fractions of the entry price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    /// Favourable move from entry that arms the trail (e.g. 0.01 = +1%)
    pub activation_pct: f64,
    /// Distance kept from the best price once armed (e.g. 0.005 = 0.5%)
    pub trailing_delta_pct: f64,
}

/// How fills and closes are confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Fills and closes are confirmed on the tick that requested them (backtesting)
    Immediate,
    /// An external collaborator confirms fills and closes
    External,
}

/// Per-instance strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub name: String,
    pub trading_pair: String,
    pub candles_interval: CandleInterval,

    /// Bollinger window size
    pub bollinger_length: usize,
    /// Standard deviation multiplier for the band width
    pub std_dev_multiplier: f64,
    /// Band position at or below which a Long is signalled
    pub long_threshold: f64,
    /// Band position at or above which a Short is signalled
    pub short_threshold: f64,

    pub leverage: u32,
    /// Stop loss distance from entry (e.g. 0.05 = 5%)
    pub stop_loss_pct: f64,
    /// Take profit distance from entry (e.g. 0.02 = 2%)
    pub take_profit_pct: f64,
    pub trailing_stop: Option<TrailingStop>,
    /// Maximum holding time before a forced exit
    pub time_limit_secs: Option<u64>,

    /// Minimum time after a close before the same side may open again
    pub cooldown_secs: u64,
    /// Maximum number of live executors per side
    pub max_executors: usize,
    pub position_mode: PositionMode,

    /// Total capital allocated to the strategy, in quote currency
    pub total_amount: f64,
    /// Fee rate charged on notional at entry and at exit
    pub fee_rate: f64,
    /// Maximum deviation of an externally confirmed fill from the requested entry
    pub max_slippage_pct: f64,
    pub fill_policy: FillPolicy,

    /// Number of candles and indicator samples kept in memory
    pub candle_retention: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "bollinger_btc_usdt".to_string(),
            trading_pair: "BTC-USDT".to_string(),
            candles_interval: CandleInterval::ThreeMinutes,
            bollinger_length: 100,
            std_dev_multiplier: 2.0,
            long_threshold: 0.0,
            short_threshold: 1.0,
            leverage: 20,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.02,
            trailing_stop: None,
            time_limit_secs: None,
            cooldown_secs: 60 * 60,
            max_executors: 5,
            position_mode: PositionMode::Hedge,
            total_amount: 1000.0,
            fee_rate: 0.0004,
            max_slippage_pct: 0.005,
            fill_policy: FillPolicy::Immediate,
            candle_retention: 500,
        }
    }
}

impl StrategyConfig {
    pub fn cooldown(&self) -> Duration {
        duration_from_secs(self.cooldown_secs)
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(duration_from_secs)
    }

    /// Capital backing a single executor
    pub fn amount_per_executor(&self) -> f64 {
        self.total_amount / self.max_executors as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Empty("name"));
        }
        if self.trading_pair.trim().is_empty() {
            return Err(ConfigError::Empty("trading_pair"));
        }
        if self.bollinger_length < 2 {
            return Err(ConfigError::BollingerLengthTooShort(self.bollinger_length));
        }
        if !(self.std_dev_multiplier.is_finite() && self.std_dev_multiplier > 0.0) {
            return Err(ConfigError::InvalidStdDevMultiplier(self.std_dev_multiplier));
        }
        validate_thresholds(self.long_threshold, self.short_threshold)?;
        if self.leverage < 1 {
            return Err(ConfigError::InvalidLeverage(self.leverage));
        }
        check_open_unit("stop_loss_pct", self.stop_loss_pct)?;
        check_positive("take_profit_pct", self.take_profit_pct)?;
        if let Some(trailing) = self.trailing_stop {
            check_positive("trailing_stop.activation_pct", trailing.activation_pct)?;
            check_open_unit("trailing_stop.trailing_delta_pct", trailing.trailing_delta_pct)?;
        }
        if let Some(limit) = self.time_limit_secs {
            if limit == 0 || limit > MAX_DURATION_SECS {
                return Err(ConfigError::OutOfRange {
                    field: "time_limit_secs",
                    value: limit as f64,
                });
            }
        }
        if self.cooldown_secs > MAX_DURATION_SECS {
            return Err(ConfigError::OutOfRange {
                field: "cooldown_secs",
                value: self.cooldown_secs as f64,
            });
        }
        if self.max_executors == 0 {
            return Err(ConfigError::ZeroMaxExecutors);
        }
        check_positive("total_amount", self.total_amount)?;
        if !(self.fee_rate.is_finite() && (0.0..1.0).contains(&self.fee_rate)) {
            return Err(ConfigError::OutOfRange {
                field: "fee_rate",
                value: self.fee_rate,
            });
        }
        if !(self.max_slippage_pct.is_finite() && self.max_slippage_pct >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "max_slippage_pct",
                value: self.max_slippage_pct,
            });
        }
        if self.candle_retention < self.bollinger_length {
            return Err(ConfigError::RetentionTooSmall {
                retention: self.candle_retention,
                bollinger_length: self.bollinger_length,
            });
        }
        Ok(())
    }
}

/// Account-wide loss limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub global_stop_loss_enabled: bool,
    /// Loss of total capital that halts all trading (e.g. 0.15 = 15%)
    pub global_stop_loss_pct: f64,
    pub daily_loss_limit_enabled: bool,
    /// Loss of total capital within one UTC day that halts new entries
    pub daily_loss_limit_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            global_stop_loss_enabled: true,
            global_stop_loss_pct: 0.15,
            daily_loss_limit_enabled: true,
            daily_loss_limit_pct: 0.05,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_stop_loss_enabled {
            check_unit("global_stop_loss_pct", self.global_stop_loss_pct)?;
        }
        if self.daily_loss_limit_enabled {
            check_unit("daily_loss_limit_pct", self.daily_loss_limit_pct)?;
        }
        Ok(())
    }
}

/// Everything one strategy instance needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        self.risk.validate()
    }
}

/// Load configuration from an optional TOML file and the environment
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut builder = ::config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(::config::File::from(path));
    }

    let settings = builder
        .add_source(
            ::config::Environment::with_prefix("BANDBOT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: EngineConfig = settings.try_deserialize()?;
    config.validate()?;

    tracing::info!(
        "Loaded strategy '{}' on {} ({}x, {:?})",
        config.strategy.name,
        config.strategy.trading_pair,
        config.strategy.leverage,
        config.strategy.position_mode
    );

    Ok(config)
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value })
    }
}

/// (0, 1)
fn check_open_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value })
    }
}

/// (0, 1]
fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value })
    }
}
