//! Async host for strategy instances
//!
//! Each instance runs on its own tokio task and exclusively owns its engine.
//! Feed updates arrive through one bounded queue and are applied strictly in
//! order; status is published on a `watch` channel after every update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::engine::{EngineStatus, ShutdownReport, StrategyEngine};
use crate::error::{EngineError, Result};
use crate::models::{Candle, PriceTick};

const FEED_QUEUE_SIZE: usize = 1024;

/// Update delivered to a running instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedEvent {
    Candle(Candle),
    Mark {
        tick: PriceTick,
        at: DateTime<Utc>,
    },
    ResetHalt,
    /// Manual close at the last observed price
    CloseExecutor {
        id: Uuid,
        at: DateTime<Utc>,
    },
    ConfirmFill {
        id: Uuid,
        fill_price: f64,
        at: DateTime<Utc>,
    },
    FailFill {
        id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
    ConfirmClose {
        id: Uuid,
        exit_price: Option<f64>,
        at: DateTime<Utc>,
    },
}

/// Handle to a strategy instance running on a background task
pub struct InstanceHandle {
    name: String,
    sender: mpsc::Sender<FeedEvent>,
    status: watch::Receiver<EngineStatus>,
    task: JoinHandle<Result<ShutdownReport>>,
}

impl InstanceHandle {
    /// Move `engine` onto a new task
    pub fn spawn(engine: StrategyEngine) -> Self {
        let name = engine.config().strategy.name.clone();
        let (sender, receiver) = mpsc::channel(FEED_QUEUE_SIZE);
        let (status_tx, status_rx) = watch::channel(engine.status());

        tracing::info!("▶️  Starting instance '{}'", name);
        let task = tokio::spawn(run_instance(engine, receiver, status_tx));

        Self {
            name,
            sender,
            status: status_rx,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue an update; waits while the queue is full
    pub async fn send(&self, event: FeedEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| EngineError::InstanceClosed)
    }

    /// Latest published status
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified after every processed update
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// Stop accepting updates, drain the queue and shut the engine down
    pub async fn close(self) -> Result<ShutdownReport> {
        drop(self.sender);
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Instance '{}' task failed: {}", self.name, e);
                Err(EngineError::InstanceClosed)
            }
        }
    }
}

async fn run_instance(
    mut engine: StrategyEngine,
    mut receiver: mpsc::Receiver<FeedEvent>,
    status: watch::Sender<EngineStatus>,
) -> Result<ShutdownReport> {
    while let Some(event) = receiver.recv().await {
        let outcome = match event {
            FeedEvent::Candle(candle) => engine.on_candle(candle).map(|_| ()),
            FeedEvent::Mark { tick, at } => engine.on_mark_price(tick, at).map(|_| ()),
            FeedEvent::ResetHalt => {
                engine.reset_halt();
                Ok(())
            }
            FeedEvent::CloseExecutor { id, at } => engine.close_executor(id, at).map(|_| ()),
            FeedEvent::ConfirmFill { id, fill_price, at } => {
                engine.confirm_fill(id, fill_price, at).map(|_| ())
            }
            FeedEvent::FailFill { id, reason, at } => engine.fail_fill(id, reason, at).map(|_| ()),
            FeedEvent::ConfirmClose { id, exit_price, at } => {
                engine.confirm_close(id, exit_price, at).map(|_| ())
            }
        };

        match outcome {
            Ok(())
            | Err(EngineError::OutOfOrderData { .. })
            | Err(EngineError::InvalidMarketData { .. }) => {}
            Err(e) => tracing::warn!(
                "Instance '{}' failed to process update: {}",
                engine.config().strategy.name,
                e
            ),
        }

        status.send_replace(engine.status());
    }

    let at = engine.status().last_tick.unwrap_or_else(Utc::now);
    engine.shutdown(at)
}
