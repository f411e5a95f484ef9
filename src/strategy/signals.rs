use crate::error::ConfigError;
use crate::indicators::IndicatorSample;
use crate::models::Signal;
use crate::settings::StrategyConfig;

/// Map a Bollinger sample to a directional signal
///
/// `band_position <= long_threshold` is a Long, `band_position >= short_threshold`
/// a Short, anything in between is no signal. Long is checked first, which only
/// matters for the degenerate equal-threshold configurations.
pub fn evaluate(sample: &IndicatorSample, config: &StrategyConfig) -> Signal {
    let position = sample.band_position;

    if position <= config.long_threshold {
        Signal::Long
    } else if position >= config.short_threshold {
        Signal::Short
    } else {
        Signal::None
    }
}

/// Thresholds must satisfy `0 <= long < short <= 1`
///
/// Equal thresholds are accepted only when both sit at the same extreme (0 or 1).
pub fn validate_thresholds(long: f64, short: f64) -> Result<(), ConfigError> {
    let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
    if !in_unit(long) || !in_unit(short) {
        return Err(ConfigError::InvalidThresholdRange { long, short });
    }

    let at_extreme = long == short && (long == 0.0 || long == 1.0);
    if long < short || at_extreme {
        Ok(())
    } else {
        Err(ConfigError::InvalidThresholdRange { long, short })
    }
}
