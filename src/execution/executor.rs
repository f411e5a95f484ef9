use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{PriceTick, Side};
use crate::settings::{duration_from_secs, StrategyConfig, TrailingStop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    /// Accepted, waiting for the entry fill
    Pending,
    /// Filled and marked to market every tick
    Active,
    /// Exit condition met, waiting for the close to be confirmed
    Closing,
    Closed,
    /// Entry fill never confirmed
    Failed,
}

impl ExecutorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutorState::Closed | ExecutorState::Failed)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    TimeLimit,
    GlobalHalt,
    Manual,
    Shutdown,
}

/// Exit rules applied to every executor of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop: Option<TrailingStop>,
    pub time_limit_secs: Option<u64>,
    pub fee_rate: f64,
}

impl ExitRules {
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
            trailing_stop: config.trailing_stop,
            time_limit_secs: config.time_limit_secs,
            fee_rate: config.fee_rate,
        }
    }
}

/// Lifecycle notification emitted by a position executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutorEvent {
    Opened {
        id: Uuid,
        side: Side,
        entry_price: f64,
        size: f64,
        leverage: u32,
        at: DateTime<Utc>,
    },
    Filled {
        id: Uuid,
        side: Side,
        entry_price: f64,
        at: DateTime<Utc>,
    },
    Marked {
        id: Uuid,
        side: Side,
        price: f64,
        unrealized_pnl: f64,
        at: DateTime<Utc>,
    },
    Closing {
        id: Uuid,
        side: Side,
        reason: CloseReason,
        exit_price: f64,
        at: DateTime<Utc>,
    },
    Closed {
        id: Uuid,
        side: Side,
        reason: CloseReason,
        entry_price: f64,
        exit_price: f64,
        size: f64,
        leverage: u32,
        fees: f64,
        realized_pnl: f64,
        opened_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Failed {
        id: Uuid,
        side: Side,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl ExecutorEvent {
    pub fn id(&self) -> Uuid {
        match self {
            ExecutorEvent::Opened { id, .. }
            | ExecutorEvent::Filled { id, .. }
            | ExecutorEvent::Marked { id, .. }
            | ExecutorEvent::Closing { id, .. }
            | ExecutorEvent::Closed { id, .. }
            | ExecutorEvent::Failed { id, .. } => *id,
        }
    }

    pub fn side(&self) -> Side {
        match self {
            ExecutorEvent::Opened { side, .. }
            | ExecutorEvent::Filled { side, .. }
            | ExecutorEvent::Marked { side, .. }
            | ExecutorEvent::Closing { side, .. }
            | ExecutorEvent::Closed { side, .. }
            | ExecutorEvent::Failed { side, .. } => *side,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ExecutorEvent::Opened { at, .. }
            | ExecutorEvent::Filled { at, .. }
            | ExecutorEvent::Marked { at, .. }
            | ExecutorEvent::Closing { at, .. }
            | ExecutorEvent::Closed { at, .. }
            | ExecutorEvent::Failed { at, .. } => *at,
        }
    }

    /// True for the events that end an executor's life
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorEvent::Closed { .. } | ExecutorEvent::Failed { .. }
        )
    }
}

/// One independently tracked leveraged position
///
/// `size` is the base-asset quantity backed by the executor's margin;
/// leverage multiplies its PnL. `size` and `leverage` never change after
/// creation and `realized_pnl` is written once, on entering a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct PositionExecutor {
    id: Uuid,
    side: Side,
    entry_price: f64,
    size: f64,
    leverage: u32,
    stop_loss_price: f64,
    take_profit_price: f64,
    opened_at: DateTime<Utc>,
    state: ExecutorState,
    realized_pnl: Option<f64>,

    current_price: f64,
    unrealized_pnl: f64,

    rules: ExitRules,
    trailing_extreme: Option<f64>,
    trailing_stop_price: Option<f64>,

    close_reason: Option<CloseReason>,
    exit_price: Option<f64>,
    closed_at: Option<DateTime<Utc>>,
    fees: f64,
    failure_reason: Option<String>,
}

impl PositionExecutor {
    /// Create a pending executor
    pub fn new(
        side: Side,
        entry_price: f64,
        size: f64,
        leverage: u32,
        rules: ExitRules,
        opened_at: DateTime<Utc>,
    ) -> Result<Self> {
        if !(entry_price.is_finite() && entry_price > 0.0) {
            return Err(EngineError::InvalidOrder(format!(
                "entry price must be positive, got {}",
                entry_price
            )));
        }
        if !(size.is_finite() && size > 0.0) {
            return Err(EngineError::InvalidOrder(format!(
                "size must be positive, got {}",
                size
            )));
        }
        if leverage < 1 {
            return Err(EngineError::InvalidOrder(format!(
                "leverage must be at least 1, got {}",
                leverage
            )));
        }

        let (stop_loss_price, take_profit_price) = exit_levels(side, entry_price, &rules);

        Ok(Self {
            id: Uuid::new_v4(),
            side,
            entry_price,
            size,
            leverage,
            stop_loss_price,
            take_profit_price,
            opened_at,
            state: ExecutorState::Pending,
            realized_pnl: None,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            rules,
            trailing_extreme: None,
            trailing_stop_price: None,
            close_reason: None,
            exit_price: None,
            closed_at: None,
            fees: 0.0,
            failure_reason: None,
        })
    }

    pub fn opened_event(&self) -> ExecutorEvent {
        ExecutorEvent::Opened {
            id: self.id,
            side: self.side,
            entry_price: self.entry_price,
            size: self.size,
            leverage: self.leverage,
            at: self.opened_at,
        }
    }

    /// Pending -> Active at `fill_price`
    ///
    /// A fill further than `max_slippage_pct` from the requested entry fails
    /// the executor instead; the returned event tells which happened.
    pub fn confirm_fill(
        &mut self,
        fill_price: f64,
        max_slippage_pct: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        self.expect_state(ExecutorState::Pending, "confirm fill")?;

        if !(fill_price.is_finite() && fill_price > 0.0) {
            return self.fail(format!("invalid fill price {}", fill_price), at);
        }
        if let Some(max_slippage) = max_slippage_pct {
            let slippage = (fill_price - self.entry_price).abs() / self.entry_price;
            if slippage > max_slippage {
                return self.fail(
                    format!(
                        "fill {:.4} is {:.2}% away from requested {:.4}",
                        fill_price,
                        slippage * 100.0,
                        self.entry_price
                    ),
                    at,
                );
            }
        }

        self.entry_price = fill_price;
        let (sl, tp) = exit_levels(self.side, fill_price, &self.rules);
        self.stop_loss_price = sl;
        self.take_profit_price = tp;
        self.current_price = fill_price;
        self.unrealized_pnl = 0.0;
        self.state = ExecutorState::Active;

        Ok(ExecutorEvent::Filled {
            id: self.id,
            side: self.side,
            entry_price: fill_price,
            at,
        })
    }

    /// Pending -> Failed
    pub fn fail(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<ExecutorEvent> {
        self.expect_state(ExecutorState::Pending, "fail")?;

        let reason = reason.into();
        self.state = ExecutorState::Failed;
        self.realized_pnl = Some(0.0);
        self.closed_at = Some(at);
        self.failure_reason = Some(reason.clone());

        Ok(ExecutorEvent::Failed {
            id: self.id,
            side: self.side,
            reason,
            at,
        })
    }

    /// Mark to market and check exit conditions
    ///
    /// Pending and terminal executors ignore ticks.
    pub fn update(&mut self, tick: &PriceTick, at: DateTime<Utc>) -> Vec<ExecutorEvent> {
        let mut events = Vec::new();

        if !matches!(self.state, ExecutorState::Active | ExecutorState::Closing) {
            return events;
        }

        self.current_price = tick.price;
        self.unrealized_pnl = self.pnl_at(tick.price);
        events.push(ExecutorEvent::Marked {
            id: self.id,
            side: self.side,
            price: tick.price,
            unrealized_pnl: self.unrealized_pnl,
            at,
        });

        if self.state == ExecutorState::Active {
            let exit = self.check_exit(tick, at);
            self.update_trailing_stop(tick);

            if let Some((reason, exit_price)) = exit {
                events.push(self.begin_close(reason, exit_price, at));
            }
        }

        events
    }

    /// Active -> Closing for a reason decided outside the executor
    pub fn request_close(
        &mut self,
        reason: CloseReason,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        self.expect_state(ExecutorState::Active, "close")?;
        self.current_price = price;
        self.unrealized_pnl = self.pnl_at(price);
        Ok(self.begin_close(reason, price, at))
    }

    /// Closing -> Closed
    ///
    /// `exit_price` overrides the price the close was requested at (the actual
    /// execution price reported by the venue).
    pub fn confirm_close(
        &mut self,
        exit_price: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        self.expect_state(ExecutorState::Closing, "confirm close")?;

        let exit_price = exit_price
            .or(self.exit_price)
            .unwrap_or(self.current_price);
        let reason = self.close_reason.unwrap_or(CloseReason::Manual);

        let fees = self.rules.fee_rate * (self.entry_price + exit_price) * self.size
            * self.leverage as f64;
        let realized_pnl = self.pnl_at(exit_price) - fees;

        self.state = ExecutorState::Closed;
        self.exit_price = Some(exit_price);
        self.closed_at = Some(at);
        self.fees = fees;
        self.realized_pnl = Some(realized_pnl);
        self.current_price = exit_price;
        self.unrealized_pnl = 0.0;

        tracing::info!(
            "Closed {:?} executor {} ({:?}) @ ${:.2}: P&L ${:.2} (fees ${:.2})",
            self.side,
            self.id,
            reason,
            exit_price,
            realized_pnl,
            fees
        );

        Ok(ExecutorEvent::Closed {
            id: self.id,
            side: self.side,
            reason,
            entry_price: self.entry_price,
            exit_price,
            size: self.size,
            leverage: self.leverage,
            fees,
            realized_pnl,
            opened_at: self.opened_at,
            at,
        })
    }

    /// Gross PnL if the position were closed at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size * self.side.sign() * self.leverage as f64
    }

    fn begin_close(&mut self, reason: CloseReason, exit_price: f64, at: DateTime<Utc>) -> ExecutorEvent {
        self.state = ExecutorState::Closing;
        self.close_reason = Some(reason);
        self.exit_price = Some(exit_price);

        tracing::debug!(
            "{:?} executor {} closing ({:?}) @ ${:.2}",
            self.side,
            self.id,
            reason,
            exit_price
        );

        ExecutorEvent::Closing {
            id: self.id,
            side: self.side,
            reason,
            exit_price,
            at,
        }
    }

    /// Exit decision for an active executor; stop loss wins when the tick's
    /// range reaches both stop loss and take profit
    fn check_exit(&self, tick: &PriceTick, at: DateTime<Utc>) -> Option<(CloseReason, f64)> {
        let (stop_hit, target_hit) = match self.side {
            Side::Long => (
                tick.low <= self.stop_loss_price,
                tick.high >= self.take_profit_price,
            ),
            Side::Short => (
                tick.high >= self.stop_loss_price,
                tick.low <= self.take_profit_price,
            ),
        };

        if stop_hit {
            return Some((CloseReason::StopLoss, self.stop_loss_price));
        }
        if target_hit {
            return Some((CloseReason::TakeProfit, self.take_profit_price));
        }

        // Trail armed on an earlier tick
        if let Some(trail) = self.trailing_stop_price {
            let triggered = match self.side {
                Side::Long => tick.low <= trail,
                Side::Short => tick.high >= trail,
            };
            if triggered {
                return Some((CloseReason::TrailingStop, trail));
            }
        }

        if let Some(limit) = self.rules.time_limit_secs {
            if at - self.opened_at >= duration_from_secs(limit) {
                return Some((CloseReason::TimeLimit, tick.price));
            }
        }

        None
    }

    fn update_trailing_stop(&mut self, tick: &PriceTick) {
        let Some(trailing) = self.rules.trailing_stop else {
            return;
        };

        match self.side {
            Side::Long => {
                let activation = self.entry_price * (1.0 + trailing.activation_pct);
                if tick.high >= activation {
                    let high = self.trailing_extreme.map_or(tick.high, |h| h.max(tick.high));
                    self.trailing_extreme = Some(high);
                    self.trailing_stop_price = Some(high * (1.0 - trailing.trailing_delta_pct));
                }
            }
            Side::Short => {
                let activation = self.entry_price * (1.0 - trailing.activation_pct);
                if tick.low <= activation {
                    let low = self.trailing_extreme.map_or(tick.low, |l| l.min(tick.low));
                    self.trailing_extreme = Some(low);
                    self.trailing_stop_price = Some(low * (1.0 + trailing.trailing_delta_pct));
                }
            }
        }
    }

    fn expect_state(&self, expected: ExecutorState, action: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.state,
                action,
            })
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    /// Position value including leverage
    pub fn notional(&self) -> f64 {
        self.entry_price * self.size * self.leverage as f64
    }

    pub fn stop_loss_price(&self) -> f64 {
        self.stop_loss_price
    }

    pub fn take_profit_price(&self) -> f64 {
        self.take_profit_price
    }

    pub fn trailing_stop_price(&self) -> Option<f64> {
        self.trailing_stop_price
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn realized_pnl(&self) -> Option<f64> {
        self.realized_pnl
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn exit_price(&self) -> Option<f64> {
        self.exit_price
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn fees(&self) -> f64 {
        self.fees
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

/// Stop loss and take profit prices for an entry
///
/// Long: stop below, target above. Short: the reverse.
pub fn exit_levels(side: Side, entry_price: f64, rules: &ExitRules) -> (f64, f64) {
    match side {
        Side::Long => (
            entry_price * (1.0 - rules.stop_loss_pct),
            entry_price * (1.0 + rules.take_profit_pct),
        ),
        Side::Short => (
            entry_price * (1.0 + rules.stop_loss_pct),
            entry_price * (1.0 - rules.take_profit_pct),
        ),
    }
}
