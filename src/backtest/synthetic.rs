use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::models::Candle;
use crate::settings::CandleInterval;

/// Shape of the generated price path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketScenario {
    /// +2% per day with light noise
    Uptrend,
    /// -2% per day with light noise
    Downtrend,
    /// Mean-reverting chop around the starting price
    Sideways,
    /// Swings of up to ±3% per candle
    Volatile,
    /// Random walk with a missing candle every 50
    WithGaps,
    /// Slow climb, then a 40% slide over the second half
    DrawdownTest,
}

impl MarketScenario {
    pub const ALL: [MarketScenario; 6] = [
        MarketScenario::Uptrend,
        MarketScenario::Downtrend,
        MarketScenario::Sideways,
        MarketScenario::Volatile,
        MarketScenario::WithGaps,
        MarketScenario::DrawdownTest,
    ];
}

/// Seeded candle generator for backtests
///
/// Output depends only on the seed, the start time and the arguments.
pub struct SyntheticDataGenerator {
    rng: StdRng,
    start: DateTime<Utc>,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64, start: DateTime<Utc>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start,
            base_price: 100.0,
            base_volume: 50_000.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `num_slots` candle slots of `interval` starting at the
    /// generator's start time
    ///
    /// Every scenario fills every slot except `WithGaps`, which leaves some
    /// empty, so it returns fewer candles.
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_slots: usize,
        interval: CandleInterval,
    ) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_slots);
        let candles_per_day = 1440.0 / interval.minutes() as f64;
        let mut price = self.base_price;

        for slot in 0..num_slots {
            price = self.next_price(scenario, price, slot, num_slots, candles_per_day);

            if scenario == MarketScenario::WithGaps && slot % 50 == 49 {
                continue;
            }

            let open_time = self.start + interval.duration() * slot as i32;
            candles.push(self.create_candle(price, open_time));
        }

        candles
    }

    fn next_price(
        &mut self,
        scenario: MarketScenario,
        price: f64,
        slot: usize,
        num_slots: usize,
        candles_per_day: f64,
    ) -> f64 {
        let next = match scenario {
            MarketScenario::Uptrend => {
                price * (1.0 + 0.02 / candles_per_day + self.rng.gen_range(-0.001..0.001))
            }
            MarketScenario::Downtrend => {
                price * (1.0 - 0.02 / candles_per_day + self.rng.gen_range(-0.001..0.001))
            }
            MarketScenario::Sideways => {
                let pull = (self.base_price - price) * 0.1;
                price + pull + price * self.rng.gen_range(-0.005..0.005)
            }
            MarketScenario::Volatile => price * (1.0 + self.rng.gen_range(-0.03..0.03)),
            MarketScenario::WithGaps => price * (1.0 + self.rng.gen_range(-0.01..0.01)),
            MarketScenario::DrawdownTest => {
                let half = (num_slots / 2).max(1);
                if slot < half {
                    price * (1.0 + self.rng.gen_range(-0.002..0.004))
                } else {
                    let slide = 0.40 / half as f64;
                    price * (1.0 - slide + self.rng.gen_range(-0.002..0.002))
                }
            }
        };

        // Keep the walk strictly positive
        next.max(self.base_price * 0.05)
    }

    fn create_candle(&mut self, close: f64, open_time: DateTime<Utc>) -> Candle {
        let wick = 0.002;
        let high = close * (1.0 + self.rng.gen_range(0.0..wick));
        let low = close * (1.0 - self.rng.gen_range(0.0..wick));
        let open = (close * (1.0 + self.rng.gen_range(-wick..wick))).clamp(low, high);

        Candle {
            open_time,
            open,
            high,
            low,
            close,
            volume: self.base_volume * self.rng.gen_range(0.7..1.3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn generate(scenario: MarketScenario, n: usize) -> Vec<Candle> {
        SyntheticDataGenerator::new(42, start()).generate(scenario, n, CandleInterval::FiveMinutes)
    }

    #[test]
    fn test_same_seed_same_candles() {
        for scenario in MarketScenario::ALL {
            assert_eq!(generate(scenario, 200), generate(scenario, 200));
        }
    }

    #[test]
    fn test_trends() {
        let up = generate(MarketScenario::Uptrend, 2000);
        let down = generate(MarketScenario::Downtrend, 2000);

        assert!(up.last().unwrap().close > up[0].close);
        assert!(down.last().unwrap().close < down[0].close);
    }

    #[test]
    fn test_sideways_stays_near_base() {
        for candle in generate(MarketScenario::Sideways, 500) {
            assert!(candle.close > 90.0 && candle.close < 110.0, "{}", candle.close);
        }
    }

    #[test]
    fn test_drawdown_falls() {
        let candles = generate(MarketScenario::DrawdownTest, 400);
        let peak = candles.iter().map(|c| c.close).fold(f64::MIN, f64::max);
        let last = candles.last().unwrap().close;

        assert!(last < peak * 0.75, "peak {} last {}", peak, last);
    }

    #[test]
    fn test_gaps_skip_slots() {
        let candles = generate(MarketScenario::WithGaps, 100);
        assert_eq!(candles.len(), 98);

        let has_gap = candles
            .windows(2)
            .any(|w| (w[1].open_time - w[0].open_time).num_minutes() > 5);
        assert!(has_gap);
    }

    #[test]
    fn test_candles_ordered_and_consistent() {
        let candles = generate(MarketScenario::Volatile, 300);

        assert_eq!(candles[0].open_time, start());
        for w in candles.windows(2) {
            assert!(w[1].open_time > w[0].open_time);
        }
        for c in &candles {
            assert!(c.high >= c.close && c.high >= c.open);
            assert!(c.low <= c.close && c.low <= c.open);
            assert!(c.close > 0.0);
        }
    }
}
