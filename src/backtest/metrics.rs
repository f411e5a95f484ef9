use serde::{Deserialize, Serialize};

use crate::execution::CloseReason;
use crate::models::Side;
use crate::pnl::TradeRecord;
use crate::risk::DenialReason;

/// Signals refused by the risk manager, per reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialCounts {
    pub capacity_reached: usize,
    pub cooldown_active: usize,
    pub opposite_side_open: usize,
    pub global_halt_active: usize,
    pub daily_limit_breached: usize,
}

impl DenialCounts {
    pub fn record(&mut self, reason: DenialReason) {
        match reason {
            DenialReason::CapacityReached => self.capacity_reached += 1,
            DenialReason::CooldownActive => self.cooldown_active += 1,
            DenialReason::OppositeSideOpenInOneWayMode => self.opposite_side_open += 1,
            DenialReason::GlobalHaltActive => self.global_halt_active += 1,
            DenialReason::DailyLimitBreached => self.daily_limit_breached += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.capacity_reached
            + self.cooldown_active
            + self.opposite_side_open
            + self.global_halt_active
            + self.daily_limit_breached
    }
}

/// How executors ended, per close reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCounts {
    pub stop_loss: usize,
    pub take_profit: usize,
    pub trailing_stop: usize,
    pub time_limit: usize,
    pub global_halt: usize,
    pub manual: usize,
    pub shutdown: usize,
}

impl ExitCounts {
    fn record(&mut self, reason: CloseReason) {
        match reason {
            CloseReason::StopLoss => self.stop_loss += 1,
            CloseReason::TakeProfit => self.take_profit += 1,
            CloseReason::TrailingStop => self.trailing_stop += 1,
            CloseReason::TimeLimit => self.time_limit += 1,
            CloseReason::GlobalHalt => self.global_halt += 1,
            CloseReason::Manual => self.manual += 1,
            CloseReason::Shutdown => self.shutdown += 1,
        }
    }
}

/// Complete backtest performance metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // P&L
    pub initial_capital: f64,
    pub final_equity: f64,
    /// Net of fees
    pub total_pnl: f64,
    pub roi_pct: f64,
    pub total_fees: f64,

    // Trade statistics
    pub total_trades: usize,
    pub long_trades: usize,
    pub short_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // P&L distribution
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Gross wins over gross losses
    pub profit_factor: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,

    pub avg_holding_period_minutes: f64,

    pub exits: ExitCounts,
    pub denials: DenialCounts,
    pub failed_executors: usize,
    pub global_halts: usize,
    pub rejected_updates: usize,
}

impl BacktestMetrics {
    /// Compute metrics from closed trades in close order
    pub fn from_trades(trades: &[TradeRecord], initial_capital: f64) -> Self {
        let total_trades = trades.len();
        let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();
        let total_fees: f64 = trades.iter().map(|t| t.fees).sum();

        let wins: Vec<f64> = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|pnl| *pnl > 0.0)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .map(|t| t.realized_pnl)
            .filter(|pnl| *pnl <= 0.0)
            .collect();

        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_pct) = Self::calculate_drawdown(trades, initial_capital);

        let mut exits = ExitCounts::default();
        for trade in trades {
            exits.record(trade.reason);
        }

        Self {
            initial_capital,
            final_equity: initial_capital + total_pnl,
            total_pnl,
            roi_pct: ratio(total_pnl, initial_capital) * 100.0,
            total_fees,
            total_trades,
            long_trades: trades.iter().filter(|t| t.side == Side::Long).count(),
            short_trades: trades.iter().filter(|t| t.side == Side::Short).count(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: ratio(wins.len() as f64, total_trades as f64) * 100.0,
            avg_win: mean(&wins),
            avg_loss: mean(&losses).abs(),
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: Self::calculate_sharpe_ratio(trades),
            avg_holding_period_minutes: mean(
                &trades
                    .iter()
                    .map(|t| t.holding_period_minutes() as f64)
                    .collect::<Vec<_>>(),
            ),
            exits,
            denials: DenialCounts::default(),
            failed_executors: 0,
            global_halts: 0,
            rejected_updates: 0,
        }
    }

    /// Largest peak-to-trough fall of closed-trade equity
    fn calculate_drawdown(trades: &[TradeRecord], initial_capital: f64) -> (f64, f64) {
        let mut equity = initial_capital;
        let mut peak = initial_capital;
        let mut max_drawdown = 0.0;
        let mut max_drawdown_pct = 0.0;

        for trade in trades {
            equity += trade.realized_pnl;
            if equity > peak {
                peak = equity;
            }

            let drawdown = peak - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                max_drawdown_pct = ratio(drawdown, peak) * 100.0;
            }
        }

        (max_drawdown, max_drawdown_pct)
    }

    /// Per-trade Sharpe ratio on return on margin, not annualized
    fn calculate_sharpe_ratio(trades: &[TradeRecord]) -> f64 {
        if trades.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = trades.iter().map(|t| t.return_on_margin_pct()).collect();
        let avg = mean(&returns);
        let variance = returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let std_dev = variance.sqrt();

        ratio(avg, std_dev)
    }

    /// Print a formatted summary to stdout
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("📊 BACKTEST RESULTS");
        println!("{}", "=".repeat(60));

        println!("\n💰 P&L");
        println!("  Initial capital:   ${:.2}", self.initial_capital);
        println!("  Final equity:      ${:.2}", self.final_equity);
        println!("  Net P&L:           ${:.2} ({:.2}%)", self.total_pnl, self.roi_pct);
        println!("  Fees paid:         ${:.2}", self.total_fees);

        println!("\n📈 Trades");
        println!(
            "  Total:             {} ({} long / {} short)",
            self.total_trades, self.long_trades, self.short_trades
        );
        println!(
            "  Win rate:          {:.1}% ({} W / {} L)",
            self.win_rate, self.winning_trades, self.losing_trades
        );
        println!("  Avg win / loss:    ${:.2} / ${:.2}", self.avg_win, self.avg_loss);
        println!(
            "  Largest win/loss:  ${:.2} / ${:.2}",
            self.largest_win, self.largest_loss
        );
        println!("  Profit factor:     {:.2}", self.profit_factor);
        println!("  Avg holding:       {:.0} min", self.avg_holding_period_minutes);

        println!("\n⚠️  Risk");
        println!(
            "  Max drawdown:      ${:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );
        println!("  Sharpe (per trade): {:.2}", self.sharpe_ratio);
        println!("  Global halts:      {}", self.global_halts);
        println!(
            "  Denied signals:    {} (capacity {}, cooldown {}, one-way {}, halt {}, daily {})",
            self.denials.total(),
            self.denials.capacity_reached,
            self.denials.cooldown_active,
            self.denials.opposite_side_open,
            self.denials.global_halt_active,
            self.denials.daily_limit_breached
        );
        println!("  Failed executors:  {}", self.failed_executors);

        println!("\n🚪 Exits");
        println!(
            "  SL {} | TP {} | trailing {} | time {} | halt {} | manual {} | shutdown {}",
            self.exits.stop_loss,
            self.exits.take_profit,
            self.exits.trailing_stop,
            self.exits.time_limit,
            self.exits.global_halt,
            self.exits.manual,
            self.exits.shutdown
        );
        println!("{}\n", "=".repeat(60));
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn trade(side: Side, pnl: f64, reason: CloseReason, held: i64) -> TradeRecord {
        TradeRecord {
            id: Uuid::nil(),
            side,
            reason,
            entry_price: 100.0,
            exit_price: 100.0,
            size: 2.0,
            leverage: 10,
            fees: 1.0,
            realized_pnl: pnl,
            opened_at: t(0),
            closed_at: t(held),
        }
    }

    #[test]
    fn test_empty_trades() {
        let metrics = BacktestMetrics::from_trades(&[], 1000.0);

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.final_equity, 1000.0);
    }

    #[test]
    fn test_win_loss_statistics() {
        let trades = vec![
            trade(Side::Long, 40.0, CloseReason::TakeProfit, 30),
            trade(Side::Short, -20.0, CloseReason::StopLoss, 60),
            trade(Side::Long, 20.0, CloseReason::TakeProfit, 90),
        ];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.long_trades, 2);
        assert_eq!(metrics.short_trades, 1);
        assert_eq!(metrics.winning_trades, 2);
        assert!((metrics.win_rate - 66.666).abs() < 0.01);
        assert_eq!(metrics.avg_win, 30.0);
        assert_eq!(metrics.avg_loss, 20.0);
        assert_eq!(metrics.largest_win, 40.0);
        assert_eq!(metrics.largest_loss, -20.0);
        assert_eq!(metrics.profit_factor, 3.0);
        assert_eq!(metrics.total_pnl, 40.0);
        assert_eq!(metrics.total_fees, 3.0);
        assert!((metrics.roi_pct - 4.0).abs() < 1e-9);
        assert_eq!(metrics.avg_holding_period_minutes, 60.0);
        assert_eq!(metrics.exits.take_profit, 2);
        assert_eq!(metrics.exits.stop_loss, 1);
    }

    #[test]
    fn test_drawdown_from_peak() {
        let trades = vec![
            trade(Side::Long, 100.0, CloseReason::TakeProfit, 1),
            trade(Side::Long, -50.0, CloseReason::StopLoss, 2),
            trade(Side::Long, -60.0, CloseReason::StopLoss, 3),
            trade(Side::Long, 30.0, CloseReason::TakeProfit, 4),
        ];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0);

        // Peak 1100, trough 990
        assert!((metrics.max_drawdown - 110.0).abs() < 1e-9);
        assert!((metrics.max_drawdown_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_wins_profit_factor() {
        let trades = vec![trade(Side::Long, 10.0, CloseReason::TakeProfit, 5)];
        let metrics = BacktestMetrics::from_trades(&trades, 1000.0);
        assert!(metrics.profit_factor.is_infinite());
    }

    #[test]
    fn test_denial_counts() {
        let mut denials = DenialCounts::default();
        denials.record(DenialReason::CapacityReached);
        denials.record(DenialReason::CapacityReached);
        denials.record(DenialReason::CooldownActive);

        assert_eq!(denials.capacity_reached, 2);
        assert_eq!(denials.total(), 3);
    }
}
