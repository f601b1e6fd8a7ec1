//! VixBot - VIX term-structure strategy backtester
//!
//! Loads daily price histories, runs the configured strategy variants
//! over the window (independent runs in parallel), and prints the
//! performance summary per variant.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vixbot_engine::engine::{
    load_store, run_parallel, BacktestConfig, BacktestResults, DataErrorPolicy, FeeSchedule,
    Instrument, StrategyVariant, TradingCalendar,
};

#[derive(Parser, Debug)]
#[command(name = "vixbot", about = "VIX term-structure strategy backtester")]
struct Args {
    /// CSV with VIX spot opens (Date,Open)
    #[arg(long, env = "VIXBOT_VIX_SPOT")]
    vix_spot: PathBuf,

    /// CSV with VIX front-month future opens (Date,Open)
    #[arg(long, env = "VIXBOT_VIX_FUTURE")]
    vix_future: PathBuf,

    /// CSV with VIXY opens and closes (Date,Open,Close)
    #[arg(long, env = "VIXBOT_VIXY")]
    vixy: PathBuf,

    /// CSV with SVXY opens and closes (needed for LSV/HLSV)
    #[arg(long, env = "VIXBOT_SVXY")]
    svxy: Option<PathBuf>,

    /// CSV with SPY opens and closes (needed for HLSV/LSLV)
    #[arg(long, env = "VIXBOT_SPY")]
    spy: Option<PathBuf>,

    /// First trading day of the window (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,

    /// Last trading day of the window (YYYY-MM-DD)
    #[arg(long)]
    end: NaiveDate,

    /// Starting capital per strategy run
    #[arg(long, default_value_t = 100_000.0)]
    capital: f64,

    /// Strategy variants to run (lsv, hlsv, lslv)
    #[arg(long, value_delimiter = ',', default_value = "lsv,hlsv,lslv")]
    strategies: Vec<String>,

    /// Per-fill brokerage, bps of notional
    #[arg(long, default_value_t = 15.0)]
    brokerage_bps: f64,

    /// Per-fill slippage, bps of notional
    #[arg(long, default_value_t = 4.0)]
    slippage_bps: f64,

    /// Annualized management drag, bps
    #[arg(long, default_value_t = 85.0)]
    management_bps: f64,

    /// Abort on the first missing data point instead of skipping the day
    #[arg(long)]
    abort_on_gap: bool,

    /// Emit full results as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let variants: Vec<StrategyVariant> = args
        .strategies
        .iter()
        .map(|s| s.parse().map_err(anyhow::Error::msg))
        .collect::<Result<_>>()?;
    if variants.is_empty() {
        bail!("no strategy variants selected");
    }

    let mut sources = vec![
        (Instrument::VixSpot, args.vix_spot.clone()),
        (Instrument::VixFuture, args.vix_future.clone()),
        (Instrument::Vixy, args.vixy.clone()),
    ];
    let needs = |instrument: Instrument| {
        variants.iter().any(|v| v.instruments().contains(&instrument))
    };
    if needs(Instrument::Svxy) {
        let path = args
            .svxy
            .clone()
            .context("selected strategies need --svxy")?;
        sources.push((Instrument::Svxy, path));
    }
    if needs(Instrument::Spy) {
        let path = args.spy.clone().context("selected strategies need --spy")?;
        sources.push((Instrument::Spy, path));
    }

    let store = load_store(&sources)?;
    let calendar = TradingCalendar::from_store(&store);

    let fees = FeeSchedule {
        brokerage_bps: args.brokerage_bps,
        slippage_bps: args.slippage_bps,
        annual_management_bps: args.management_bps,
    };
    let policy = if args.abort_on_gap {
        DataErrorPolicy::Abort
    } else {
        DataErrorPolicy::SkipAndLog
    };

    let configs = variants
        .iter()
        .map(|&variant| BacktestConfig {
            variant,
            start_date: args.start,
            end_date: args.end,
            starting_capital: args.capital,
            fees,
            on_data_error: policy,
        })
        .collect();

    let outcomes = run_parallel(&store, &calendar, configs);

    let mut completed = Vec::new();
    let mut failed = 0usize;
    for (variant, outcome) in variants.iter().zip(outcomes) {
        match outcome {
            Ok(results) => completed.push(results),
            Err(err) => {
                failed += 1;
                error!(%variant, %err, "backtest failed");
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&completed)?);
    } else {
        print_summary(&completed);
    }

    if failed > 0 {
        bail!("{failed} backtest run(s) failed");
    }
    Ok(())
}

fn print_summary(results: &[BacktestResults]) {
    println!(
        "{:<6} {:>6} {:>7} {:>7} {:>14} {:>9} {:>9} {:>11}",
        "run", "days", "trades", "skipped", "final equity", "return", "max dd", "fees paid"
    );
    for r in results {
        println!(
            "{:<6} {:>6} {:>7} {:>7} {:>14.2} {:>8.2}% {:>8.2}% {:>11.2}",
            r.variant.to_string(),
            r.days_processed(),
            r.trades.len(),
            r.skipped_days.len(),
            r.equity.final_equity,
            r.equity.total_return * 100.0,
            r.equity.max_drawdown_pct * 100.0,
            r.fee_totals.total(),
        );
        for skipped in &r.skipped_days {
            println!("       skipped {}: {}", skipped.date, skipped.reason);
        }
    }
}
