use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::moving_average::{calculate_sma, calculate_std_dev};
use super::Readiness;
use crate::models::Candle;

/// Bollinger Bands reading for the latest candle of a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSample {
    /// Open time of the candle the sample was computed for
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub middle_band: f64,
    pub upper_band: f64,
    pub lower_band: f64,
    /// Where the close sits in the envelope: 0 = lower band, 1 = upper band
    pub band_position: f64,
}

impl IndicatorSample {
    pub fn band_width(&self) -> f64 {
        self.upper_band - self.lower_band
    }
}

/// Bollinger Bands over the trailing `length` closes
///
/// Middle = SMA(close), bands = middle ± multiplier × sample standard deviation.
/// Holds no state between calls: the same window always yields the same sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    length: usize,
    std_dev_multiplier: f64,
}

impl BollingerBands {
    pub fn new(length: usize, std_dev_multiplier: f64) -> Self {
        Self {
            length,
            std_dev_multiplier,
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Compute the sample for the last candle of `candles`
    pub fn compute(&self, candles: &[Candle]) -> Readiness<IndicatorSample> {
        if candles.len() < self.length {
            return Readiness::NotReady {
                available: candles.len(),
                required: self.length,
            };
        }

        let window = &candles[candles.len() - self.length..];
        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();

        let (Some(middle), Some(std_dev)) = (
            calculate_sma(&closes, self.length),
            calculate_std_dev(&closes, self.length),
        ) else {
            return Readiness::NotReady {
                available: candles.len(),
                required: self.length.max(2),
            };
        };

        let last = &window[window.len() - 1];
        let upper = middle + self.std_dev_multiplier * std_dev;
        let lower = middle - self.std_dev_multiplier * std_dev;

        Readiness::Ready(IndicatorSample {
            timestamp: last.open_time,
            close: last.close,
            middle_band: middle,
            upper_band: upper,
            lower_band: lower,
            band_position: band_position(last.close, lower, upper),
        })
    }
}

/// Normalized position of `close` between the bands, clamped to [0, 1]
///
/// A zero-width envelope has no meaningful position; it reads as the middle.
pub fn band_position(close: f64, lower: f64, upper: f64) -> f64 {
    let width = upper - lower;
    if width <= 0.0 || !width.is_finite() {
        return 0.5;
    }
    ((close - lower) / width).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn make_candles(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: start + Duration::minutes(3 * i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_not_ready_below_length() {
        let bands = BollingerBands::new(20, 2.0);
        let candles = make_candles(&[100.0; 19]);

        assert_eq!(
            bands.compute(&candles),
            Readiness::NotReady {
                available: 19,
                required: 20
            }
        );
    }

    #[test]
    fn test_ready_at_length() {
        let bands = BollingerBands::new(20, 2.0);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let candles = make_candles(&closes);

        let sample = bands.compute(&candles).ready().unwrap();
        assert!((sample.middle_band - 109.5).abs() < 1e-9);
        assert!(sample.upper_band > sample.middle_band);
        assert!(sample.lower_band < sample.middle_band);
        assert_eq!(sample.timestamp, candles[19].open_time);
        assert_eq!(sample.close, 119.0);
    }

    #[test]
    fn test_band_width_uses_sample_std_dev() {
        let bands = BollingerBands::new(4, 1.0);
        let candles = make_candles(&[1.0, 2.0, 3.0, 4.0]);

        let sample = bands.compute(&candles).ready().unwrap();
        // mean 2.5, sample variance 5/3
        let sd = (5.0f64 / 3.0).sqrt();
        assert!((sample.upper_band - (2.5 + sd)).abs() < 1e-12);
        assert!((sample.lower_band - (2.5 - sd)).abs() < 1e-12);
    }

    #[test]
    fn test_only_trailing_window_counts() {
        let bands = BollingerBands::new(3, 2.0);
        let short = make_candles(&[10.0, 11.0, 12.0]);
        let long = make_candles(&[500.0, 1.0, 10.0, 11.0, 12.0]);

        let a = bands.compute(&short).ready().unwrap();
        let b = bands.compute(&long).ready().unwrap();
        assert_eq!(a.middle_band, b.middle_band);
        assert_eq!(a.band_position, b.band_position);
    }

    #[test]
    fn test_degenerate_band_is_mid() {
        let bands = BollingerBands::new(5, 2.0);
        let candles = make_candles(&[100.0; 5]);

        let sample = bands.compute(&candles).ready().unwrap();
        assert_eq!(sample.band_width(), 0.0);
        assert_eq!(sample.band_position, 0.5);
    }

    #[test]
    fn test_band_position_clamped() {
        assert_eq!(band_position(90.0, 95.0, 105.0), 0.0);
        assert_eq!(band_position(110.0, 95.0, 105.0), 1.0);
        assert_eq!(band_position(100.0, 95.0, 105.0), 0.5);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let bands = BollingerBands::new(10, 2.0);
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let candles = make_candles(&closes);

        assert_eq!(bands.compute(&candles), bands.compute(&candles));
    }
}
