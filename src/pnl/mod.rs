// Profit and loss aggregation across all executors of one strategy
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{CloseReason, ExecutorEvent};
use crate::models::Side;
use crate::risk::PnlState;

/// Point of the cumulative realized PnL curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlPoint {
    pub at: DateTime<Utc>,
    pub cumulative_realized: f64,
}

/// Record of a single closed executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub side: Side,
    pub reason: CloseReason,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub leverage: u32,
    pub fees: f64,
    /// Net of fees
    pub realized_pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn holding_period_minutes(&self) -> i64 {
        (self.closed_at - self.opened_at).num_minutes()
    }

    /// Return on the margin committed to the trade, in percent
    pub fn return_on_margin_pct(&self) -> f64 {
        let margin = self.entry_price * self.size;
        if margin > 0.0 {
            self.realized_pnl / margin * 100.0
        } else {
            0.0
        }
    }
}

/// Read-only PnL view for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlSnapshot {
    pub as_of: DateTime<Utc>,
    /// Realized PnL of closes at or before `as_of`
    pub realized_pnl: f64,
    /// Latest mark of the executors open now; not cut at `as_of`
    pub unrealized_pnl: f64,
    pub cumulative_pnl_series: Vec<PnlPoint>,
    /// Realized PnL over total capital
    pub roi: f64,
    pub fees_paid: f64,
    pub closed_trades: usize,
    pub failed_executors: usize,
}

/// Fold of executor events into PnL figures
///
/// Holds nothing but what the events carry, so replaying the same events
/// into a fresh aggregator yields the same snapshot.
#[derive(Debug, Clone)]
pub struct PnlAggregator {
    total_capital: f64,
    realized: f64,
    fees_paid: f64,
    unrealized: BTreeMap<Uuid, f64>,
    series: Vec<PnlPoint>,
    trades: Vec<TradeRecord>,
    failed: Vec<DateTime<Utc>>,
}

impl PnlAggregator {
    pub fn new(total_capital: f64) -> Self {
        Self {
            total_capital,
            realized: 0.0,
            fees_paid: 0.0,
            unrealized: BTreeMap::new(),
            series: Vec::new(),
            trades: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record(&mut self, event: &ExecutorEvent) {
        match event {
            ExecutorEvent::Opened { .. } | ExecutorEvent::Closing { .. } => {}
            ExecutorEvent::Filled { id, .. } => {
                self.unrealized.insert(*id, 0.0);
            }
            ExecutorEvent::Marked {
                id, unrealized_pnl, ..
            } => {
                self.unrealized.insert(*id, *unrealized_pnl);
            }
            ExecutorEvent::Closed {
                id,
                side,
                reason,
                entry_price,
                exit_price,
                size,
                leverage,
                fees,
                realized_pnl,
                opened_at,
                at,
            } => {
                self.unrealized.remove(id);
                self.realized += realized_pnl;
                self.fees_paid += fees;

                // Keep the curve non-decreasing in time
                let at = self.series.last().map_or(*at, |last| last.at.max(*at));
                self.series.push(PnlPoint {
                    at,
                    cumulative_realized: self.realized,
                });

                self.trades.push(TradeRecord {
                    id: *id,
                    side: *side,
                    reason: *reason,
                    entry_price: *entry_price,
                    exit_price: *exit_price,
                    size: *size,
                    leverage: *leverage,
                    fees: *fees,
                    realized_pnl: *realized_pnl,
                    opened_at: *opened_at,
                    closed_at: at,
                });
            }
            ExecutorEvent::Failed { id, at, .. } => {
                self.unrealized.remove(id);
                self.failed.push(*at);
            }
        }
    }

    pub fn record_all<'a>(&mut self, events: impl IntoIterator<Item = &'a ExecutorEvent>) {
        for event in events {
            self.record(event);
        }
    }

    /// PnL view as of `as_of`
    ///
    /// Realized figures include only closes at or before `as_of`; unrealized
    /// PnL is the latest mark of every open executor.
    pub fn snapshot(&self, as_of: DateTime<Utc>) -> PnlSnapshot {
        let series: Vec<PnlPoint> = self
            .series
            .iter()
            .take_while(|p| p.at <= as_of)
            .copied()
            .collect();
        let realized_pnl = series.last().map_or(0.0, |p| p.cumulative_realized);
        let closed: Vec<&TradeRecord> = self
            .trades
            .iter()
            .take_while(|t| t.closed_at <= as_of)
            .collect();

        PnlSnapshot {
            as_of,
            realized_pnl,
            unrealized_pnl: self.unrealized_total(),
            cumulative_pnl_series: series,
            roi: self.roi_of(realized_pnl),
            fees_paid: closed.iter().map(|t| t.fees).sum(),
            closed_trades: closed.len(),
            failed_executors: self.failed.iter().filter(|&&at| at <= as_of).count(),
        }
    }

    /// Current totals, for risk evaluation
    pub fn pnl_state(&self) -> PnlState {
        PnlState {
            realized: self.realized,
            unrealized: self.unrealized_total(),
        }
    }

    pub fn realized(&self) -> f64 {
        self.realized
    }

    pub fn roi(&self) -> f64 {
        self.roi_of(self.realized)
    }

    pub fn fees_paid(&self) -> f64 {
        self.fees_paid
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn total_capital(&self) -> f64 {
        self.total_capital
    }

    /// ROI base for subsequent snapshots; recorded figures are kept
    pub fn set_total_capital(&mut self, total_capital: f64) {
        self.total_capital = total_capital;
    }

    fn unrealized_total(&self) -> f64 {
        self.unrealized.values().sum()
    }

    fn roi_of(&self, realized: f64) -> f64 {
        if self.total_capital > 0.0 {
            realized / self.total_capital
        } else {
            0.0
        }
    }
}
