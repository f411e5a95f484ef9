use std::collections::VecDeque;

use crate::error::{EngineError, Result};
use crate::models::Candle;

/// Bounded, strictly ordered candle history for one trading pair
///
/// Maintains a rolling window: once full, every append evicts the oldest candle.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    trading_pair: String,
    candles: VecDeque<Candle>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep (at least 1)
    pub fn new(trading_pair: impl Into<String>, max_candles: usize) -> Self {
        let max_candles = max_candles.max(1);
        Self {
            trading_pair: trading_pair.into(),
            candles: VecDeque::with_capacity(max_candles),
            max_candles,
        }
    }

    /// Append a candle
    ///
    /// Fails with `OutOfOrderData` when `open_time` is not strictly after the
    /// last stored candle (duplicates included).
    pub fn add_candle(&mut self, candle: Candle) -> Result<()> {
        if let Some(last) = self.candles.back() {
            if candle.open_time <= last.open_time {
                return Err(EngineError::OutOfOrderData {
                    last: last.open_time,
                    received: candle.open_time,
                });
            }
        }

        self.candles.push_back(candle);

        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }

        Ok(())
    }

    /// All stored candles, oldest first
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// The `n` most recent candles, oldest first
    pub fn recent_candles(&self, n: usize) -> Vec<Candle> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_candles
    }

    pub fn trading_pair(&self) -> &str {
        &self.trading_pair
    }
}
