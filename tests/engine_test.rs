use bandbot::backtest::{MarketScenario, SyntheticDataGenerator};
use bandbot::execution::{CloseReason, ExecutorEvent, ExecutorState, SpawnResult};
use bandbot::indicators::{BollingerBands, IndicatorSample, Readiness};
use bandbot::pnl::PnlAggregator;
use bandbot::risk::{Authorization, DenialReason, HaltDecision, PnlState, PoolState, RiskManager};
use bandbot::settings::{CandleInterval, FillPolicy, RiskConfig};
use bandbot::strategy::evaluate;
use bandbot::*;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn minutes(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

fn candle(i: i64, close: f64) -> Candle {
    Candle {
        open_time: minutes(i),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1.0,
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        strategy: StrategyConfig {
            candles_interval: CandleInterval::OneMinute,
            bollinger_length: 20,
            long_threshold: 0.0,
            short_threshold: 1.0,
            leverage: 10,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.02,
            cooldown_secs: 0,
            max_executors: 2,
            total_amount: 1000.0,
            fee_rate: 0.0,
            candle_retention: 100,
            ..Default::default()
        },
        risk: RiskConfig::default(),
    }
}

/// 19 closes alternating 100/101 (minutes 0..=18)
fn warm_up(engine: &mut StrategyEngine) {
    for i in 0..19 {
        engine
            .on_candle(candle(i, if i % 2 == 0 { 100.0 } else { 101.0 }))
            .unwrap();
    }
}

/// Warm up and break below the lower band: a Long opens at 90 on minute 20
fn open_long(engine: &mut StrategyEngine) -> uuid::Uuid {
    warm_up(engine);
    let report = engine.on_candle(candle(19, 90.0)).unwrap();
    match report.spawn {
        Some(SpawnResult::Spawned { id, .. }) => id,
        other => panic!("expected a spawned Long, got {:?}", other),
    }
}

#[test]
fn test_indicator_needs_full_window() {
    let bands = BollingerBands::new(20, 2.0);
    let candles: Vec<Candle> = (0..20).map(|i| candle(i, 100.0 + i as f64)).collect();

    assert_eq!(
        bands.compute(&candles[..19]),
        Readiness::NotReady {
            available: 19,
            required: 20
        }
    );
    assert!(bands.compute(&candles).is_ready());
}

#[test]
fn test_engine_signals_only_after_window_fills() {
    let mut engine = StrategyEngine::new(config()).unwrap();

    for i in 0..19 {
        // Far below anything seen so far, but the window is not full yet
        let report = engine.on_candle(candle(i, 100.0 - i as f64)).unwrap();
        assert!(report.sample.is_none());
        assert_eq!(report.signal, Signal::None);
        assert!(report.spawn.is_none());
    }

    let report = engine.on_candle(candle(19, 50.0)).unwrap();
    assert!(report.sample.is_some());
    assert_eq!(report.signal, Signal::Long);
}

#[test]
fn test_threshold_violations_are_invalid_config() {
    for (long, short) in [(0.6, 0.4), (0.5, 0.5), (-0.1, 0.9), (0.1, 1.2)] {
        let mut cfg = config();
        cfg.strategy.long_threshold = long;
        cfg.strategy.short_threshold = short;

        assert!(
            matches!(
                StrategyEngine::new(cfg),
                Err(EngineError::InvalidConfig(
                    ConfigError::InvalidThresholdRange { .. }
                ))
            ),
            "thresholds {}/{} should be rejected",
            long,
            short
        );
    }
}

#[test]
fn test_band_position_zero_with_zero_threshold_is_long() {
    let sample = IndicatorSample {
        timestamp: t0(),
        close: 95.0,
        middle_band: 100.0,
        upper_band: 105.0,
        lower_band: 95.0,
        band_position: 0.0,
    };
    let strategy = StrategyConfig {
        long_threshold: 0.0,
        short_threshold: 1.0,
        ..Default::default()
    };

    assert_eq!(evaluate(&sample, &strategy), Signal::Long);
}

#[test]
fn test_capacity_one_denies_second_long() {
    let strategy = StrategyConfig {
        max_executors: 1,
        ..Default::default()
    };
    let risk = RiskManager::new(RiskConfig::default(), &strategy);
    let pool = PoolState {
        long_open: 1,
        ..Default::default()
    };

    assert_eq!(
        risk.authorize_open(Side::Long, &pool, t0()),
        Authorization::Denied(DenialReason::CapacityReached)
    );
}

#[test]
fn test_global_stop_at_fifteen_percent() {
    let strategy = StrategyConfig {
        total_amount: 1000.0,
        ..Default::default()
    };
    let mut risk = RiskManager::new(RiskConfig::default(), &strategy);
    let pnl = PnlState {
        realized: -160.0,
        unrealized: 0.0,
    };

    assert_eq!(risk.evaluate_global_halt(&pnl, t0()), HaltDecision::HaltAll);
    assert_eq!(
        risk.authorize_open(Side::Long, &PoolState::default(), t0()),
        Authorization::Denied(DenialReason::GlobalHaltActive)
    );
}

#[test]
fn test_engine_capacity_with_max_one() {
    let mut cfg = config();
    cfg.strategy.max_executors = 1;
    cfg.strategy.stop_loss_pct = 0.5;
    cfg.risk.global_stop_loss_enabled = false;
    cfg.risk.daily_loss_limit_enabled = false;
    let mut engine = StrategyEngine::new(cfg).unwrap();
    open_long(&mut engine);

    let report = engine.on_candle(candle(20, 70.0)).unwrap();
    assert_eq!(report.signal, Signal::Long);
    assert_eq!(
        report.spawn,
        Some(SpawnResult::Denied {
            side: Side::Long,
            reason: DenialReason::CapacityReached
        })
    );
    assert_eq!(engine.status().long_open, 1);
}

#[test]
fn test_capacity_and_one_way_hold_at_every_tick() {
    let mut cfg = config();
    cfg.strategy.max_executors = 2;
    cfg.strategy.position_mode = PositionMode::OneWay;
    cfg.strategy.long_threshold = 0.2;
    cfg.strategy.short_threshold = 0.8;
    cfg.risk.global_stop_loss_enabled = false;
    cfg.risk.daily_loss_limit_enabled = false;
    let mut engine = StrategyEngine::new(cfg).unwrap();

    let candles = SyntheticDataGenerator::new(11, t0()).generate(
        MarketScenario::Volatile,
        800,
        CandleInterval::OneMinute,
    );

    let mut spawned = 0;
    for candle in candles {
        let report = engine.on_candle(candle).unwrap();
        if matches!(report.spawn, Some(SpawnResult::Spawned { .. })) {
            spawned += 1;
        }

        let status = engine.status();
        assert!(status.long_open <= 2);
        assert!(status.short_open <= 2);
        assert!(status.long_open == 0 || status.short_open == 0);
    }

    assert!(spawned > 0);
}

#[test]
fn test_hedge_and_one_way_on_opposite_signal() {
    let run = |mode: PositionMode| {
        let mut cfg = config();
        cfg.strategy.take_profit_pct = 0.5;
        cfg.strategy.position_mode = mode;
        let mut engine = StrategyEngine::new(cfg).unwrap();
        open_long(&mut engine);

        // Far above the upper band; the Long stays open with its TP at 135
        engine.on_candle(candle(20, 110.0)).unwrap()
    };

    let hedge = run(PositionMode::Hedge);
    assert_eq!(hedge.signal, Signal::Short);
    assert!(matches!(
        hedge.spawn,
        Some(SpawnResult::Spawned {
            side: Side::Short,
            ..
        })
    ));

    let one_way = run(PositionMode::OneWay);
    assert_eq!(one_way.signal, Signal::Short);
    assert_eq!(
        one_way.spawn,
        Some(SpawnResult::Denied {
            side: Side::Short,
            reason: DenialReason::OppositeSideOpenInOneWayMode
        })
    );
}

#[test]
fn test_cooldown_after_close() {
    let mut cfg = config();
    cfg.strategy.cooldown_secs = 600;
    let mut engine = StrategyEngine::new(cfg).unwrap();
    open_long(&mut engine);

    // Take profit at 91.8, half a minute after the open
    let closed_at = t0() + Duration::seconds(20 * 60 + 30);
    engine.on_mark_price(PriceTick::at(92.0), closed_at).unwrap();
    assert!(engine.executors().is_empty());

    let report = engine.on_candle(candle(20, 85.0)).unwrap();
    assert_eq!(report.signal, Signal::Long);
    assert_eq!(
        report.spawn,
        Some(SpawnResult::Denied {
            side: Side::Long,
            reason: DenialReason::CooldownActive
        })
    );

    for i in 21..30 {
        let report = engine.on_candle(candle(i, 89.0)).unwrap();
        assert!(!matches!(report.spawn, Some(SpawnResult::Spawned { .. })));
    }

    // Candle 30 closes at minute 31, past the 10 minute cooldown
    let report = engine.on_candle(candle(30, 10.0)).unwrap();
    assert!(matches!(
        report.spawn,
        Some(SpawnResult::Spawned {
            side: Side::Long,
            ..
        })
    ));
}

#[test]
fn test_stop_loss_wins_when_tick_spans_both_levels() {
    let mut engine = StrategyEngine::new(config()).unwrap();
    open_long(&mut engine);

    let tick = PriceTick {
        price: 90.0,
        high: 95.0,
        low: 80.0,
    };
    let report = engine
        .on_mark_price(tick, t0() + Duration::seconds(20 * 60 + 5))
        .unwrap();

    let closed = report
        .events
        .iter()
        .find_map(|e| match e {
            ExecutorEvent::Closed {
                reason, exit_price, ..
            } => Some((*reason, *exit_price)),
            _ => None,
        })
        .unwrap();
    assert_eq!(closed.0, CloseReason::StopLoss);
    assert!((closed.1 - 85.5).abs() < 1e-9);
}

#[test]
fn test_pnl_replay_is_deterministic() {
    let mut cfg = config();
    cfg.strategy.long_threshold = 0.1;
    cfg.strategy.short_threshold = 0.9;
    cfg.strategy.fee_rate = 0.0004;
    let mut engine = StrategyEngine::new(cfg).unwrap();

    let candles = SyntheticDataGenerator::new(5, t0()).generate(
        MarketScenario::Sideways,
        600,
        CandleInterval::OneMinute,
    );

    let mut events = Vec::new();
    for candle in candles {
        events.extend(engine.on_candle(candle).unwrap().events);
    }
    let end = engine.status().last_tick.unwrap();
    let shutdown = engine.shutdown(end).unwrap();
    events.extend(shutdown.events.iter().cloned());

    let mut first = PnlAggregator::new(1000.0);
    first.record_all(&events);
    let mut second = PnlAggregator::new(1000.0);
    second.record_all(&events);

    assert_eq!(first.snapshot(end), shutdown.snapshot);
    assert_eq!(first.snapshot(end), second.snapshot(end));
    assert!(!shutdown.trades.is_empty());
}

#[test]
fn test_external_fill_lifecycle() {
    let mut cfg = config();
    cfg.strategy.fill_policy = FillPolicy::External;
    let mut engine = StrategyEngine::new(cfg).unwrap();
    let id = open_long(&mut engine);
    assert_eq!(engine.executors()[0].state(), ExecutorState::Pending);

    // Pending executors ignore marks
    let report = engine
        .on_mark_price(PriceTick::at(50.0), t0() + Duration::seconds(20 * 60 + 5))
        .unwrap();
    assert!(report.events.is_empty());

    engine.confirm_fill(id, 90.1, minutes(21)).unwrap();
    assert_eq!(engine.executors()[0].state(), ExecutorState::Active);

    engine
        .on_mark_price(PriceTick::at(80.0), t0() + Duration::seconds(21 * 60 + 5))
        .unwrap();
    assert_eq!(engine.executors()[0].state(), ExecutorState::Closing);

    let event = engine.confirm_close(id, Some(85.0), minutes(22)).unwrap();
    assert!(matches!(
        event,
        ExecutorEvent::Closed {
            reason: CloseReason::StopLoss,
            ..
        }
    ));
    assert!(engine.executors().is_empty());
    assert!(engine.status().realized_pnl < 0.0);
}

#[test]
fn test_out_of_order_and_duplicates_are_dropped() {
    let mut engine = StrategyEngine::new(config()).unwrap();
    engine.on_candle(candle(10, 100.0)).unwrap();

    for stale in [candle(10, 100.0), candle(9, 100.0)] {
        assert!(matches!(
            engine.on_candle(stale),
            Err(EngineError::OutOfOrderData { .. })
        ));
    }
    assert!(engine
        .on_mark_price(PriceTick::at(100.0), minutes(5))
        .is_err());

    assert_eq!(engine.rejected_updates(), 3);
    assert_eq!(engine.candles().len(), 1);
}

#[test]
fn test_daily_limit_across_midnight() {
    let mut cfg = config();
    cfg.strategy.leverage = 5;
    let mut engine = StrategyEngine::new(cfg).unwrap();

    // Warm up from 23:30 and open a Long at 90 on the 23:50 close
    let late = 23 * 60 + 30;
    for i in 0..19 {
        engine
            .on_candle(candle(late + i, if i % 2 == 0 { 100.0 } else { 101.0 }))
            .unwrap();
    }
    let report = engine.on_candle(candle(late + 19, 90.0)).unwrap();
    assert!(matches!(report.spawn, Some(SpawnResult::Spawned { .. })));
    assert_eq!(report.halt, HaltDecision::Continue);

    // First tick of the new day carries an overnight loss of about 55 (5% limit is 50)
    let day2 = minutes(24 * 60);
    let report = engine
        .on_mark_price(PriceTick::at(88.0), day2 + Duration::seconds(30))
        .unwrap();
    assert_eq!(report.halt, HaltDecision::HaltNewEntries);
    assert_eq!(engine.status().halt, HaltDecision::HaltNewEntries);

    // The open Long still exits on its own take profit
    let report = engine
        .on_mark_price(PriceTick::at(92.0), day2 + Duration::minutes(1))
        .unwrap();
    assert!(report.events.iter().any(|e| matches!(
        e,
        ExecutorEvent::Closed {
            reason: CloseReason::TakeProfit,
            ..
        }
    )));
    assert_eq!(report.halt, HaltDecision::HaltNewEntries);

    // A new breakout the same day is refused
    let report = engine.on_candle(candle(24 * 60 + 1, 85.0)).unwrap();
    assert_eq!(report.signal, Signal::Long);
    assert_eq!(
        report.spawn,
        Some(SpawnResult::Denied {
            side: Side::Long,
            reason: DenialReason::DailyLimitBreached
        })
    );

    // Entries resume after the UTC rollover
    let report = engine.on_candle(candle(48 * 60, 80.0)).unwrap();
    assert_eq!(report.halt, HaltDecision::Continue);
    assert_eq!(report.signal, Signal::Long);
    assert!(matches!(report.spawn, Some(SpawnResult::Spawned { .. })));
}

#[test]
fn test_malformed_market_data_is_dropped() {
    let mut engine = StrategyEngine::new(config()).unwrap();
    let id = open_long(&mut engine);
    let before = engine.status();

    let bad_candles = [
        candle(20, 0.0),
        candle(20, f64::NAN),
        Candle {
            high: 95.0,
            low: 99.0,
            ..candle(20, 97.0)
        },
    ];
    for bad in bad_candles {
        assert!(matches!(
            engine.on_candle(bad),
            Err(EngineError::InvalidMarketData { .. })
        ));
    }
    assert!(matches!(
        engine.on_mark_price(PriceTick::at(-1.0), minutes(21)),
        Err(EngineError::InvalidMarketData { .. })
    ));

    // Nothing moved: same clock, same candles, executor untouched
    let after = engine.status();
    assert_eq!(after.rejected_updates, 4);
    assert_eq!(after.last_tick, before.last_tick);
    assert_eq!(after.last_price, before.last_price);
    assert_eq!(after.candles, before.candles);
    assert_eq!(engine.executors()[0].id(), id);
    assert_eq!(engine.executors()[0].state(), ExecutorState::Active);

    // The feed carries on afterwards
    assert!(engine.on_candle(candle(20, 91.0)).is_ok());
    assert_eq!(engine.rejected_updates(), 4);
}

#[test]
fn test_status_serializes() {
    let mut engine = StrategyEngine::new(config()).unwrap();
    open_long(&mut engine);

    let json = serde_json::to_value(engine.status()).unwrap();
    assert_eq!(json["long_open"], 1);
    assert_eq!(json["halt"], "Continue");

    let executors = serde_json::to_value(engine.executors()).unwrap();
    assert_eq!(executors[0]["state"], "Active");
}
