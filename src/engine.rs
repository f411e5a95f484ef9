//! Single-instance strategy engine
//!
//! One [`StrategyEngine`] owns everything a strategy instance needs: the
//! candle store, indicator history, executor pool, risk manager and PnL
//! aggregator. Every tick runs the same fixed pipeline:
//!
//! 1. reject stale data
//! 2. mark live executors (exits fire here)
//! 3. aggregate PnL and evaluate loss limits
//! 4. on a candle: indicator, signal, spawn
//!
//! Time is always supplied by the caller; the engine never reads a clock.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::execution::{
    CandleBuffer, CloseReason, ExecutorEvent, ExecutorPool, PositionExecutor, SpawnResult,
};
use crate::indicators::bollinger::{BollingerBands, IndicatorSample};
use crate::indicators::Readiness;
use crate::models::{Candle, PriceTick, Side, Signal};
use crate::pnl::{PnlAggregator, PnlSnapshot, TradeRecord};
use crate::risk::{HaltDecision, RiskManager};
use crate::settings::EngineConfig;
use crate::strategy::signals;

/// Everything that happened on one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    /// Indicator reading, once enough candles are stored
    pub sample: Option<IndicatorSample>,
    pub signal: Signal,
    pub spawn: Option<SpawnResult>,
    pub events: Vec<ExecutorEvent>,
    pub halt: HaltDecision,
}

/// Read-only status for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub name: String,
    pub trading_pair: String,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_price: Option<f64>,
    pub candles: usize,
    pub indicator_ready: bool,
    pub long_open: usize,
    pub short_open: usize,
    pub closed_executors: usize,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub halt: HaltDecision,
    pub denied_signals: usize,
    pub rejected_updates: usize,
}

/// Final state of an instance after shutdown
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub at: DateTime<Utc>,
    /// Events produced by force-closing what was still live
    pub events: Vec<ExecutorEvent>,
    pub snapshot: PnlSnapshot,
    pub trades: Vec<TradeRecord>,
    pub history: Vec<PositionExecutor>,
    pub denied_signals: usize,
    pub rejected_updates: usize,
}

pub struct StrategyEngine {
    config: EngineConfig,
    candles: CandleBuffer,
    bands: BollingerBands,
    samples: VecDeque<IndicatorSample>,
    pool: ExecutorPool,
    risk: RiskManager,
    pnl: PnlAggregator,

    last_tick: Option<DateTime<Utc>>,
    last_price: Option<f64>,
    halt: HaltDecision,
    rejected_updates: usize,
}

impl StrategyEngine {
    /// Build an engine from a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let strategy = &config.strategy;

        tracing::info!(
            "🚀 Strategy '{}' on {} | BB({}, {}) thresholds {:.2}/{:.2} | {}x {:?} | max {} per side",
            strategy.name,
            strategy.trading_pair,
            strategy.bollinger_length,
            strategy.std_dev_multiplier,
            strategy.long_threshold,
            strategy.short_threshold,
            strategy.leverage,
            strategy.position_mode,
            strategy.max_executors
        );

        Ok(Self {
            candles: CandleBuffer::new(strategy.trading_pair.clone(), strategy.candle_retention),
            bands: BollingerBands::new(strategy.bollinger_length, strategy.std_dev_multiplier),
            samples: VecDeque::with_capacity(strategy.candle_retention),
            pool: ExecutorPool::new(strategy),
            risk: RiskManager::new(config.risk.clone(), strategy),
            pnl: PnlAggregator::new(strategy.total_amount),
            last_tick: None,
            last_price: None,
            halt: HaltDecision::Continue,
            rejected_updates: 0,
            config,
        })
    }

    /// Process a closed candle
    ///
    /// The tick time is the candle's close (`open_time` + interval). Malformed
    /// candles fail with `InvalidMarketData`, stale or duplicate ones with
    /// `OutOfOrderData`; both are counted and leave the engine untouched.
    pub fn on_candle(&mut self, candle: Candle) -> Result<TickReport> {
        let at = candle.open_time + self.config.strategy.candles_interval.duration();
        let price = candle.close;
        let tick = PriceTick::from_candle(&candle);

        if let Err(reason) = candle.validate() {
            return Err(self.reject(EngineError::InvalidMarketData { at, reason }));
        }
        // A candle may close on the same instant as the last mark
        self.check_clock(at, true)?;
        if let Err(e) = self.candles.add_candle(candle) {
            return Err(self.reject(e));
        }
        self.advance(at, price);

        let mut events = self.mark(&tick, at)?;
        let halt = self.evaluate_halt(price, at, &mut events)?;

        let mut report = TickReport {
            at,
            sample: None,
            signal: Signal::None,
            spawn: None,
            events,
            halt,
        };

        let window = self.candles.recent_candles(self.bands.length());
        match self.bands.compute(&window) {
            Readiness::Ready(sample) => {
                self.push_sample(sample);
                let signal = signals::evaluate(&sample, &self.config.strategy);
                if signal != Signal::None {
                    tracing::debug!(
                        "{:?} signal @ ${:.2} (band position {:.3})",
                        signal,
                        price,
                        sample.band_position
                    );
                }

                let spawn = self.pool.on_signal(signal, price, at, &self.risk)?;
                if let SpawnResult::Spawned { events, .. } = &spawn {
                    self.pnl.record_all(events);
                    report.events.extend(events.iter().cloned());
                }

                report.sample = Some(sample);
                report.signal = signal;
                report.spawn = Some(spawn);
            }
            Readiness::NotReady {
                available,
                required,
            } => {
                tracing::debug!(
                    "Indicator not ready: {}/{} candles for {}",
                    available,
                    required,
                    self.candles.trading_pair()
                );
            }
        }

        Ok(report)
    }

    /// Process an intra-candle mark price
    ///
    /// Marks only drive exits and loss limits; signals come from candles.
    pub fn on_mark_price(&mut self, tick: PriceTick, at: DateTime<Utc>) -> Result<TickReport> {
        if let Err(reason) = tick.validate() {
            return Err(self.reject(EngineError::InvalidMarketData { at, reason }));
        }
        self.check_clock(at, false)?;
        self.advance(at, tick.price);

        let mut events = self.mark(&tick, at)?;
        let halt = self.evaluate_halt(tick.price, at, &mut events)?;

        Ok(TickReport {
            at,
            sample: None,
            signal: Signal::None,
            spawn: None,
            events,
            halt,
        })
    }

    /// Replace the configuration; refused while any executor is live
    pub fn update_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.pool.reconfigure(&config.strategy)?;

        let old = &self.config.strategy;
        let new = &config.strategy;
        if old.trading_pair != new.trading_pair || old.candles_interval != new.candles_interval {
            self.candles = CandleBuffer::new(new.trading_pair.clone(), new.candle_retention);
            self.samples.clear();
        } else if old.candle_retention != new.candle_retention {
            let mut candles = CandleBuffer::new(new.trading_pair.clone(), new.candle_retention);
            for candle in self.candles.candles() {
                candles.add_candle(candle)?;
            }
            self.candles = candles;
            while self.samples.len() > new.candle_retention {
                self.samples.pop_front();
            }
        }

        self.bands = BollingerBands::new(new.bollinger_length, new.std_dev_multiplier);
        self.risk.reconfigure(config.risk.clone(), new);
        self.pnl.set_total_capital(new.total_amount);

        tracing::info!("Reconfigured strategy '{}'", new.name);
        self.config = config;
        Ok(())
    }

    /// Manually close one executor at the last observed price
    pub fn close_executor(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<Vec<ExecutorEvent>> {
        let price = self.last_price.ok_or_else(|| {
            EngineError::InvalidOrder("no price observed yet".to_string())
        })?;
        let events = self.pool.close_executor(id, price, at)?;
        self.pnl.record_all(&events);
        Ok(events)
    }

    /// Clear a global halt so new executors may open again
    pub fn reset_halt(&mut self) {
        self.risk.reset_halt();
        self.halt = match self.last_tick {
            Some(at) => self.risk.current_halt(at),
            None => HaltDecision::Continue,
        };
    }

    /// External confirmation of an entry fill
    pub fn confirm_fill(
        &mut self,
        id: Uuid,
        fill_price: f64,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        let event = self.pool.confirm_fill(id, fill_price, at)?;
        self.pnl.record(&event);
        Ok(event)
    }

    /// External report that an entry will never fill
    pub fn fail_fill(
        &mut self,
        id: Uuid,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        let event = self.pool.fail_fill(id, reason, at)?;
        self.pnl.record(&event);
        Ok(event)
    }

    /// External confirmation of a close
    pub fn confirm_close(
        &mut self,
        id: Uuid,
        exit_price: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        let event = self.pool.confirm_close(id, exit_price, at)?;
        self.pnl.record(&event);
        Ok(event)
    }

    pub fn snapshot(&self, as_of: DateTime<Utc>) -> PnlSnapshot {
        self.pnl.snapshot(as_of)
    }

    /// Live executors
    pub fn executors(&self) -> &[PositionExecutor] {
        self.pool.executors()
    }

    /// Closed and failed executors
    pub fn history(&self) -> &[PositionExecutor] {
        self.pool.history()
    }

    /// Retained indicator samples, oldest first
    pub fn samples(&self) -> &VecDeque<IndicatorSample> {
        &self.samples
    }

    pub fn status(&self) -> EngineStatus {
        let pool = self.pool.state();
        let pnl = self.pnl.pnl_state();

        EngineStatus {
            name: self.config.strategy.name.clone(),
            trading_pair: self.config.strategy.trading_pair.clone(),
            last_tick: self.last_tick,
            last_price: self.last_price,
            candles: self.candles.len(),
            indicator_ready: self.candles.len() >= self.bands.length(),
            long_open: pool.open(Side::Long),
            short_open: pool.open(Side::Short),
            closed_executors: self.pool.history().len(),
            realized_pnl: pnl.realized,
            unrealized_pnl: pnl.unrealized,
            halt: self.halt,
            denied_signals: self.pool.denied_signals(),
            rejected_updates: self.rejected_updates,
        }
    }

    /// Number of feed updates dropped as malformed, stale or duplicate
    pub fn rejected_updates(&self) -> usize {
        self.rejected_updates
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pnl(&self) -> &PnlAggregator {
        &self.pnl
    }

    pub fn candles(&self) -> &CandleBuffer {
        &self.candles
    }

    /// Stop the instance, market-closing every live executor
    ///
    /// Pending executors fail; active and closing ones close at the last
    /// observed price regardless of the fill policy.
    pub fn shutdown(mut self, at: DateTime<Utc>) -> Result<ShutdownReport> {
        let at = self.last_tick.map_or(at, |last| last.max(at));
        let price = self.last_price.unwrap_or_default();

        let events = self.pool.force_close_all(CloseReason::Shutdown, price, at)?;
        self.pnl.record_all(&events);

        let snapshot = self.pnl.snapshot(at);
        tracing::info!(
            "🏁 Strategy '{}' stopped: {} executors closed, realized P&L ${:.2} (ROI {:.2}%)",
            self.config.strategy.name,
            self.pool.history().len(),
            snapshot.realized_pnl,
            snapshot.roi * 100.0
        );

        Ok(ShutdownReport {
            at,
            events,
            snapshot,
            trades: self.pnl.trades().to_vec(),
            history: self.pool.history().to_vec(),
            denied_signals: self.pool.denied_signals(),
            rejected_updates: self.rejected_updates,
        })
    }

    fn check_clock(&mut self, at: DateTime<Utc>, allow_equal: bool) -> Result<()> {
        if let Some(last) = self.last_tick {
            if at < last || (at == last && !allow_equal) {
                return Err(self.reject(EngineError::OutOfOrderData { last, received: at }));
            }
        }
        Ok(())
    }

    fn reject(&mut self, error: EngineError) -> EngineError {
        self.rejected_updates += 1;
        tracing::warn!("Dropped feed update: {}", error);
        error
    }

    fn advance(&mut self, at: DateTime<Utc>, price: f64) {
        self.last_tick = Some(at);
        self.last_price = Some(price);
    }

    fn mark(&mut self, tick: &PriceTick, at: DateTime<Utc>) -> Result<Vec<ExecutorEvent>> {
        let events = self.pool.on_tick(tick, at)?;
        self.pnl.record_all(&events);
        Ok(events)
    }

    fn evaluate_halt(
        &mut self,
        price: f64,
        at: DateTime<Utc>,
        events: &mut Vec<ExecutorEvent>,
    ) -> Result<HaltDecision> {
        let decision = self.risk.evaluate_global_halt(&self.pnl.pnl_state(), at);

        if decision == HaltDecision::HaltAll && self.pool.live_count() > 0 {
            let closed = self.pool.close_all(CloseReason::GlobalHalt, price, at)?;
            self.pnl.record_all(&closed);
            events.extend(closed);
        }

        self.halt = decision;
        Ok(decision)
    }

    fn push_sample(&mut self, sample: IndicatorSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.config.strategy.candle_retention {
            self.samples.pop_front();
        }
    }
}
