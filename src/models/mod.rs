use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick for the strategy's trading pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Reject candles no exchange could have printed
    pub fn validate(&self) -> Result<(), &'static str> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err("prices must be finite and positive");
        }
        if self.low > self.high {
            return Err("low is above high");
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err("volume must be finite and non-negative");
        }
        Ok(())
    }
}

/// Mark price observed on a tick, with the range traded since the previous tick
///
/// `high`/`low` let stop-loss and take-profit levels be checked against the
/// whole intra-tick range rather than only the last print.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: f64,
    pub high: f64,
    pub low: f64,
}

impl PriceTick {
    /// A tick with no range (a single print)
    pub fn at(price: f64) -> Self {
        Self {
            price,
            high: price,
            low: price,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        let prices = [self.price, self.high, self.low];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err("prices must be finite and positive");
        }
        if self.low > self.price || self.price > self.high {
            return Err("price is outside the low/high range");
        }
        Ok(())
    }

    /// Tick spanning the full range of a candle, marked at its close
    pub fn from_candle(candle: &Candle) -> Self {
        Self {
            price: candle.close,
            high: candle.high.max(candle.close),
            low: candle.low.min(candle.close),
        }
    }
}

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for Long, -1 for Short
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// Directional intent produced by the signal generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    None,
}

impl Signal {
    /// Side this signal asks to open, if any
    pub fn side(self) -> Option<Side> {
        match self {
            Signal::Long => Some(Side::Long),
            Signal::Short => Some(Side::Short),
            Signal::None => None,
        }
    }
}

/// Exchange position mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    /// Long and Short positions may be open at the same time
    #[serde(rename = "HEDGE", alias = "hedge")]
    Hedge,
    /// Only one side may hold positions at a time
    #[serde(rename = "ONE-WAY", alias = "one-way", alias = "ONEWAY", alias = "oneway")]
    OneWay,
}
