use std::path::PathBuf;

use anyhow::{Context, Result};
use bandbot::backtest::{
    BacktestMetrics, BacktestRunner, MarketScenario, SyntheticDataGenerator,
};
use bandbot::settings::{load_config, EngineConfig};
use bandbot::{FeedEvent, InstanceHandle, StrategyEngine};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-position Bollinger Bands strategy engine")]
struct Args {
    /// TOML configuration file; BANDBOT__* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Synthetic market to replay
    #[arg(short, long, value_enum, default_value = "sideways")]
    scenario: ScenarioArg,

    /// Number of candle slots to generate
    #[arg(short = 'n', long, default_value = "2000")]
    candles: usize,

    /// Seed for the synthetic data
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Print results as JSON instead of a text report
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ScenarioArg {
    Uptrend,
    Downtrend,
    Sideways,
    Volatile,
    WithGaps,
    DrawdownTest,
    /// Every scenario, each on its own instance in parallel
    All,
}

impl ScenarioArg {
    fn scenario(self) -> Option<MarketScenario> {
        match self {
            ScenarioArg::Uptrend => Some(MarketScenario::Uptrend),
            ScenarioArg::Downtrend => Some(MarketScenario::Downtrend),
            ScenarioArg::Sideways => Some(MarketScenario::Sideways),
            ScenarioArg::Volatile => Some(MarketScenario::Volatile),
            ScenarioArg::WithGaps => Some(MarketScenario::WithGaps),
            ScenarioArg::DrawdownTest => Some(MarketScenario::DrawdownTest),
            ScenarioArg::All => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("invalid configuration")?;
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .context("invalid start time")?;

    match args.scenario.scenario() {
        Some(scenario) => run_single(&args, config, scenario, start),
        None => run_all(&args, config, start).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bandbot=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_single(
    args: &Args,
    config: EngineConfig,
    scenario: MarketScenario,
    start: DateTime<Utc>,
) -> Result<()> {
    let candles = SyntheticDataGenerator::new(args.seed, start).generate(
        scenario,
        args.candles,
        config.strategy.candles_interval,
    );

    if !args.json {
        println!("\n🔬 Running backtest: {:?}", scenario);
        println!("   Strategy: {} on {}", config.strategy.name, config.strategy.trading_pair);
        println!("   Candles: {}", candles.len());
        println!("   Capital: ${:.2}", config.strategy.total_amount);
    }

    let report = BacktestRunner::new(config)
        .run(candles)
        .with_context(|| format!("backtest failed for {:?}", scenario))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.metrics.print_summary();
    }

    Ok(())
}

async fn run_all(args: &Args, config: EngineConfig, start: DateTime<Utc>) -> Result<()> {
    let mut tasks = Vec::new();

    for scenario in MarketScenario::ALL {
        let mut instance_config = config.clone();
        instance_config.strategy.name = format!("{}_{:?}", config.strategy.name, scenario);

        let engine = StrategyEngine::new(instance_config)?;
        let candles = SyntheticDataGenerator::new(args.seed, start).generate(
            scenario,
            args.candles,
            config.strategy.candles_interval,
        );

        let handle = InstanceHandle::spawn(engine);
        tasks.push((
            scenario,
            tokio::spawn(async move {
                for candle in candles {
                    handle.send(FeedEvent::Candle(candle)).await?;
                }
                handle.close().await
            }),
        ));
    }

    let mut results = Vec::new();
    for (scenario, task) in tasks {
        let report = task
            .await
            .context("instance task panicked")?
            .with_context(|| format!("instance failed for {:?}", scenario))?;

        let mut metrics = BacktestMetrics::from_trades(&report.trades, config.strategy.total_amount);
        metrics.failed_executors = report.snapshot.failed_executors;
        metrics.rejected_updates = report.rejected_updates;
        results.push((scenario, metrics));
    }

    if args.json {
        let summary: Vec<serde_json::Value> = results
            .iter()
            .map(|(scenario, metrics)| {
                serde_json::json!({ "scenario": scenario, "metrics": metrics })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_comparison(&results);
    }

    Ok(())
}

fn print_comparison(results: &[(MarketScenario, BacktestMetrics)]) {
    println!("\n{}", "=".repeat(70));
    println!("📊 SCENARIO COMPARISON");
    println!("{}\n", "=".repeat(70));

    println!(
        "{:<16} {:>10} {:>9} {:>8} {:>8} {:>8} {:>8}",
        "Scenario", "P&L", "ROI%", "Trades", "Win%", "MaxDD%", "Fees"
    );
    println!("{}", "─".repeat(70));

    for (scenario, metrics) in results {
        println!(
            "{:<16} {:>10.2} {:>9.2} {:>8} {:>8.1} {:>8.2} {:>8.2}",
            format!("{:?}", scenario),
            metrics.total_pnl,
            metrics.roi_pct,
            metrics.total_trades,
            metrics.win_rate,
            metrics.max_drawdown_pct,
            metrics.total_fees
        );
    }

    println!();
}
