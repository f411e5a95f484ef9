use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PositionMode, Side};
use crate::settings::{RiskConfig, StrategyConfig};

/// Why a new executor was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    CapacityReached,
    CooldownActive,
    OppositeSideOpenInOneWayMode,
    GlobalHaltActive,
    DailyLimitBreached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authorization {
    Allowed,
    Denied(DenialReason),
}

/// Account-wide trading status decided each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltDecision {
    Continue,
    /// No new entries for the rest of the trading day
    HaltNewEntries,
    /// Close everything; stays in force until reset manually
    HaltAll,
}

/// Per-side view of the executor pool used to authorize openings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub long_open: usize,
    pub short_open: usize,
    pub long_cooldown_until: Option<DateTime<Utc>>,
    pub short_cooldown_until: Option<DateTime<Utc>>,
}

impl PoolState {
    pub fn open(&self, side: Side) -> usize {
        match side {
            Side::Long => self.long_open,
            Side::Short => self.short_open,
        }
    }

    pub fn cooldown_until(&self, side: Side) -> Option<DateTime<Utc>> {
        match side {
            Side::Long => self.long_cooldown_until,
            Side::Short => self.short_cooldown_until,
        }
    }

    pub fn total_open(&self) -> usize {
        self.long_open + self.short_open
    }
}

/// Realized and unrealized PnL fed back from the aggregator
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlState {
    pub realized: f64,
    pub unrealized: f64,
}

impl PnlState {
    pub fn total(&self) -> f64 {
        self.realized + self.unrealized
    }
}

/// Capacity, position-mode, cooldown and loss-limit gatekeeper
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    total_capital: f64,
    max_executors: usize,
    position_mode: PositionMode,

    halted_all: bool,
    trading_day: Option<NaiveDate>,
    day_start_pnl: f64,
    /// Total PnL seen by the previous evaluation
    last_total: f64,
    daily_halt_day: Option<NaiveDate>,
}

impl RiskManager {
    pub fn new(config: RiskConfig, strategy: &StrategyConfig) -> Self {
        Self {
            config,
            total_capital: strategy.total_amount,
            max_executors: strategy.max_executors,
            position_mode: strategy.position_mode,
            halted_all: false,
            trading_day: None,
            day_start_pnl: 0.0,
            last_total: 0.0,
            daily_halt_day: None,
        }
    }

    /// Swap limits between runs; halt state is kept
    pub fn reconfigure(&mut self, config: RiskConfig, strategy: &StrategyConfig) {
        self.config = config;
        self.total_capital = strategy.total_amount;
        self.max_executors = strategy.max_executors;
        self.position_mode = strategy.position_mode;
    }

    /// Decide whether a new executor may open on `side`
    ///
    /// Checks run in a fixed order: global halt, daily limit, one-way
    /// exclusivity, capacity, cooldown.
    pub fn authorize_open(&self, side: Side, pool: &PoolState, now: DateTime<Utc>) -> Authorization {
        if self.halted_all {
            return Authorization::Denied(DenialReason::GlobalHaltActive);
        }
        if self.daily_halt_day == Some(now.date_naive()) {
            return Authorization::Denied(DenialReason::DailyLimitBreached);
        }
        if self.position_mode == PositionMode::OneWay && pool.open(side.opposite()) > 0 {
            return Authorization::Denied(DenialReason::OppositeSideOpenInOneWayMode);
        }
        if pool.open(side) >= self.max_executors {
            return Authorization::Denied(DenialReason::CapacityReached);
        }
        if let Some(until) = pool.cooldown_until(side) {
            if now < until {
                return Authorization::Denied(DenialReason::CooldownActive);
            }
        }

        Authorization::Allowed
    }

    /// Compare account PnL against the global and daily loss limits
    ///
    /// Called every tick. `HaltAll` latches until [`reset_halt`](Self::reset_halt);
    /// `HaltNewEntries` latches for the current UTC day only.
    pub fn evaluate_global_halt(&mut self, pnl: &PnlState, now: DateTime<Utc>) -> HaltDecision {
        let today = now.date_naive();
        let total = pnl.total();

        // Baseline is the total as of the end of the previous day
        if self.trading_day != Some(today) {
            self.day_start_pnl = match self.trading_day {
                Some(_) => self.last_total,
                None => total,
            };
            if self.trading_day.is_some() {
                tracing::debug!(
                    "Trading day rollover to {}: daily P&L baseline ${:.2}",
                    today,
                    self.day_start_pnl
                );
            }
            self.trading_day = Some(today);
        }
        self.last_total = total;

        if self.config.global_stop_loss_enabled
            && total <= -self.config.global_stop_loss_pct * self.total_capital
        {
            if !self.halted_all {
                tracing::warn!(
                    "🛑 Global stop loss hit: P&L ${:.2} <= -{:.1}% of ${:.2}",
                    total,
                    self.config.global_stop_loss_pct * 100.0,
                    self.total_capital
                );
            }
            self.halted_all = true;
        }

        if self.halted_all {
            return HaltDecision::HaltAll;
        }

        let daily_pnl = total - self.day_start_pnl;
        if self.config.daily_loss_limit_enabled
            && daily_pnl <= -self.config.daily_loss_limit_pct * self.total_capital
            && self.daily_halt_day != Some(today)
        {
            tracing::warn!(
                "⚠️ Daily loss limit hit: ${:.2} today, no new entries until {}",
                daily_pnl,
                today.succ_opt().unwrap_or(today)
            );
            self.daily_halt_day = Some(today);
        }

        if self.daily_halt_day == Some(today) {
            HaltDecision::HaltNewEntries
        } else {
            HaltDecision::Continue
        }
    }

    /// Halt in force at `now` without re-evaluating PnL
    pub fn current_halt(&self, now: DateTime<Utc>) -> HaltDecision {
        if self.halted_all {
            HaltDecision::HaltAll
        } else if self.daily_halt_day == Some(now.date_naive()) {
            HaltDecision::HaltNewEntries
        } else {
            HaltDecision::Continue
        }
    }

    /// Manually clear a global halt
    pub fn reset_halt(&mut self) {
        if self.halted_all {
            tracing::info!("Global halt reset");
        }
        self.halted_all = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted_all
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }
}
