use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::execution::executor::{
    CloseReason, ExecutorEvent, ExecutorState, ExitRules, PositionExecutor,
};
use crate::models::{PriceTick, Side, Signal};
use crate::risk::{Authorization, DenialReason, PoolState, RiskManager};
use crate::settings::{FillPolicy, StrategyConfig};

/// Outcome of feeding one signal to the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpawnResult {
    NoSignal,
    Denied {
        side: Side,
        reason: DenialReason,
    },
    Spawned {
        id: Uuid,
        side: Side,
        events: Vec<ExecutorEvent>,
    },
}

/// Owner of every position executor of one strategy instance
///
/// Live executors stay in the pool until they reach a terminal state, then
/// move to the history. Each terminal transition restarts its side's cooldown.
pub struct ExecutorPool {
    config: StrategyConfig,
    rules: ExitRules,
    executors: Vec<PositionExecutor>,
    history: Vec<PositionExecutor>,
    last_close_long: Option<DateTime<Utc>>,
    last_close_short: Option<DateTime<Utc>>,
    denied_signals: usize,
}

impl ExecutorPool {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            config: config.clone(),
            rules: ExitRules::from_config(config),
            executors: Vec::new(),
            history: Vec::new(),
            last_close_long: None,
            last_close_short: None,
            denied_signals: 0,
        }
    }

    /// Replace the strategy parameters; only valid while nothing is live
    pub fn reconfigure(&mut self, config: &StrategyConfig) -> Result<()> {
        if !self.executors.is_empty() {
            return Err(EngineError::ConfigLockedWhileActive {
                open: self.executors.len(),
            });
        }
        self.config = config.clone();
        self.rules = ExitRules::from_config(config);
        Ok(())
    }

    /// Live counts and cooldown deadlines per side
    pub fn state(&self) -> PoolState {
        let count = |side: Side| self.executors.iter().filter(|e| e.side() == side).count();
        let cooldown = self.config.cooldown();

        PoolState {
            long_open: count(Side::Long),
            short_open: count(Side::Short),
            long_cooldown_until: self.last_close_long.map(|t| cooldown_end(t, cooldown)),
            short_cooldown_until: self.last_close_short.map(|t| cooldown_end(t, cooldown)),
        }
    }

    /// Open an executor for `signal` if the risk manager allows it
    ///
    /// Denied signals are dropped; the next indicator tick may signal again.
    pub fn on_signal(
        &mut self,
        signal: Signal,
        current_price: f64,
        at: DateTime<Utc>,
        risk: &RiskManager,
    ) -> Result<SpawnResult> {
        let Some(side) = signal.side() else {
            return Ok(SpawnResult::NoSignal);
        };

        match risk.authorize_open(side, &self.state(), at) {
            Authorization::Allowed => self.spawn(side, current_price, at),
            Authorization::Denied(reason) => {
                self.denied_signals += 1;
                tracing::debug!("{:?} signal @ ${:.2} denied: {:?}", side, current_price, reason);
                Ok(SpawnResult::Denied { side, reason })
            }
        }
    }

    /// Feed several signals from the same tick in a deterministic order
    ///
    /// A side that already holds positions goes first, so in one-way mode the
    /// opposite signal is the one denied. With nothing open, Long goes before Short.
    pub fn on_signals(
        &mut self,
        signals: &[Signal],
        current_price: f64,
        at: DateTime<Utc>,
        risk: &RiskManager,
    ) -> Result<Vec<SpawnResult>> {
        let state = self.state();
        let preferred = if state.short_open > 0 && state.long_open == 0 {
            Side::Short
        } else {
            Side::Long
        };

        let mut ordered = signals.to_vec();
        ordered.sort_by_key(|signal| match signal.side() {
            Some(side) if side == preferred => 0,
            Some(_) => 1,
            None => 2,
        });

        ordered
            .into_iter()
            .map(|signal| self.on_signal(signal, current_price, at, risk))
            .collect()
    }

    /// Forward a mark to every live executor and retire the finished ones
    pub fn on_tick(&mut self, tick: &PriceTick, at: DateTime<Utc>) -> Result<Vec<ExecutorEvent>> {
        let mut events = Vec::new();

        for executor in &mut self.executors {
            events.extend(executor.update(tick, at));
        }

        if self.config.fill_policy == FillPolicy::Immediate {
            for executor in &mut self.executors {
                if executor.state() == ExecutorState::Closing {
                    events.push(executor.confirm_close(None, at)?);
                }
            }
        }

        self.retire_terminal(at);
        Ok(events)
    }

    /// Close every live executor regardless of its own exit levels
    ///
    /// Pending executors fail since they never filled. Under the external fill
    /// policy active executors are left in `Closing` for confirmation.
    pub fn close_all(
        &mut self,
        reason: CloseReason,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<ExecutorEvent>> {
        let confirm = self.config.fill_policy == FillPolicy::Immediate;
        self.close_all_inner(reason, price, at, confirm)
    }

    /// Like [`close_all`](Self::close_all) but every executor ends terminal
    /// on this call, whatever the fill policy
    pub fn force_close_all(
        &mut self,
        reason: CloseReason,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<ExecutorEvent>> {
        self.close_all_inner(reason, price, at, true)
    }

    /// Manual close of one executor
    pub fn close_executor(
        &mut self,
        id: Uuid,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Vec<ExecutorEvent>> {
        let confirm = self.config.fill_policy == FillPolicy::Immediate;
        let executor = self.live_mut(id)?;

        let mut events = vec![executor.request_close(CloseReason::Manual, price, at)?];
        if confirm {
            events.push(executor.confirm_close(None, at)?);
        }

        self.retire_terminal(at);
        Ok(events)
    }

    /// External confirmation of an entry fill
    pub fn confirm_fill(
        &mut self,
        id: Uuid,
        fill_price: f64,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        let max_slippage = self.config.max_slippage_pct;
        let event = self.live_mut(id)?.confirm_fill(fill_price, Some(max_slippage), at)?;

        if let ExecutorEvent::Failed { reason, .. } = &event {
            tracing::warn!("Executor {} failed to fill: {}", id, reason);
        }

        self.retire_terminal(at);
        Ok(event)
    }

    /// External report that an entry can never fill
    pub fn fail_fill(
        &mut self,
        id: Uuid,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        let event = self.live_mut(id)?.fail(reason, at)?;
        tracing::warn!("Executor {} failed: {:?}", id, event);
        self.retire_terminal(at);
        Ok(event)
    }

    /// External confirmation of a close, optionally at the executed price
    pub fn confirm_close(
        &mut self,
        id: Uuid,
        exit_price: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<ExecutorEvent> {
        let event = self.live_mut(id)?.confirm_close(exit_price, at)?;
        self.retire_terminal(at);
        Ok(event)
    }

    /// Live executors (pending, active, closing)
    pub fn executors(&self) -> &[PositionExecutor] {
        &self.executors
    }

    /// Executors that reached a terminal state, in retirement order
    pub fn history(&self) -> &[PositionExecutor] {
        &self.history
    }

    pub fn live_count(&self) -> usize {
        self.executors.len()
    }

    pub fn denied_signals(&self) -> usize {
        self.denied_signals
    }

    fn spawn(&mut self, side: Side, price: f64, at: DateTime<Utc>) -> Result<SpawnResult> {
        if !(price.is_finite() && price > 0.0) {
            return Err(EngineError::InvalidOrder(format!(
                "cannot size a position at price {}",
                price
            )));
        }

        let size = self.config.amount_per_executor() / price;
        let mut executor =
            PositionExecutor::new(side, price, size, self.config.leverage, self.rules, at)?;
        let mut events = vec![executor.opened_event()];

        if self.config.fill_policy == FillPolicy::Immediate {
            events.push(executor.confirm_fill(price, None, at)?);
        }

        tracing::info!(
            "📈 Opened {:?} executor {} @ ${:.2} size {:.6} ({}x) SL ${:.2} TP ${:.2}",
            side,
            executor.id(),
            price,
            size,
            executor.leverage(),
            executor.stop_loss_price(),
            executor.take_profit_price()
        );

        let id = executor.id();
        self.executors.push(executor);
        Ok(SpawnResult::Spawned { id, side, events })
    }

    fn close_all_inner(
        &mut self,
        reason: CloseReason,
        price: f64,
        at: DateTime<Utc>,
        confirm: bool,
    ) -> Result<Vec<ExecutorEvent>> {
        let mut events = Vec::new();

        for executor in &mut self.executors {
            match executor.state() {
                ExecutorState::Pending => {
                    events.push(executor.fail(format!("cancelled before fill ({:?})", reason), at)?);
                }
                ExecutorState::Active => {
                    events.push(executor.request_close(reason, price, at)?);
                    if confirm {
                        events.push(executor.confirm_close(None, at)?);
                    }
                }
                ExecutorState::Closing => {
                    if confirm {
                        events.push(executor.confirm_close(None, at)?);
                    }
                }
                ExecutorState::Closed | ExecutorState::Failed => {}
            }
        }

        if !events.is_empty() {
            tracing::info!("Closed all executors ({:?}) @ ${:.2}", reason, price);
        }

        self.retire_terminal(at);
        Ok(events)
    }

    fn live_mut(&mut self, id: Uuid) -> Result<&mut PositionExecutor> {
        self.executors
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or(EngineError::ExecutorNotFound(id))
    }

    fn retire_terminal(&mut self, at: DateTime<Utc>) {
        let (done, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.executors)
            .into_iter()
            .partition(|e| e.state().is_terminal());
        self.executors = live;

        for executor in done {
            let closed_at = executor.closed_at().unwrap_or(at);
            let last_close = match executor.side() {
                Side::Long => &mut self.last_close_long,
                Side::Short => &mut self.last_close_short,
            };
            if last_close.map_or(true, |t| closed_at > t) {
                *last_close = Some(closed_at);
            }
            self.history.push(executor);
        }
    }
}

/// End of a cooldown, pinned to the latest representable time on overflow
fn cooldown_end(closed_at: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    closed_at
        .checked_add_signed(cooldown)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
