use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backtest::metrics::{BacktestMetrics, DenialCounts};
use crate::engine::{EngineStatus, StrategyEngine};
use crate::error::{EngineError, Result};
use crate::execution::SpawnResult;
use crate::models::Candle;
use crate::pnl::{PnlSnapshot, TradeRecord};
use crate::risk::HaltDecision;
use crate::settings::EngineConfig;

/// Outcome of one backtest
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub candles: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metrics: BacktestMetrics,
    pub snapshot: PnlSnapshot,
    pub trades: Vec<TradeRecord>,
    /// Engine status just before shutdown
    pub status: EngineStatus,
}

/// Replays candles through a fresh engine
pub struct BacktestRunner {
    config: EngineConfig,
}

impl BacktestRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Feed every candle in order, then shut down at the last close
    ///
    /// Candles the engine rejects as malformed or out of order are skipped;
    /// the engine counts them.
    pub fn run(&self, candles: Vec<Candle>) -> Result<BacktestReport> {
        let mut engine = StrategyEngine::new(self.config.clone())?;
        let total_candles = candles.len();

        tracing::info!(
            "Starting backtest: {} candles, indicator needs {}",
            total_candles,
            self.config.strategy.bollinger_length
        );

        let mut denials = DenialCounts::default();
        let mut global_halts = 0;
        let mut previous_halt = HaltDecision::Continue;
        let mut started_at = None;

        for candle in candles {
            let report = match engine.on_candle(candle) {
                Ok(report) => report,
                Err(EngineError::OutOfOrderData { .. })
                | Err(EngineError::InvalidMarketData { .. }) => continue,
                Err(e) => return Err(e),
            };
            started_at.get_or_insert(report.at);

            if report.halt == HaltDecision::HaltAll && previous_halt != HaltDecision::HaltAll {
                global_halts += 1;
            }
            previous_halt = report.halt;

            if let Some(SpawnResult::Denied { reason, .. }) = report.spawn {
                denials.record(reason);
            }
        }

        let status = engine.status();
        let finished_at = status.last_tick;
        let shutdown = engine.shutdown(finished_at.unwrap_or_default())?;

        let mut metrics =
            BacktestMetrics::from_trades(&shutdown.trades, self.config.strategy.total_amount);
        metrics.denials = denials;
        metrics.global_halts = global_halts;
        metrics.failed_executors = shutdown.snapshot.failed_executors;
        metrics.rejected_updates = shutdown.rejected_updates;

        tracing::info!(
            "Backtest complete: {} trades, P&L: ${:.2} ({:.2}%)",
            metrics.total_trades,
            metrics.total_pnl,
            metrics.roi_pct
        );

        Ok(BacktestReport {
            candles: total_candles,
            started_at,
            finished_at,
            metrics,
            snapshot: shutdown.snapshot,
            trades: shutdown.trades,
            status,
        })
    }
}
