use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use withdrawal_backtest::cli::{
    BacktestArgs, Cli, Command, DeclinesArgs, MarketArgs, SolveArgs, build_inputs,
    build_solve_config,
};
use withdrawal_backtest::core::{
    Inputs, MarketTick, TracingObserver, declines, sim_periods, solve_max_withdrawal_rate,
};
use withdrawal_backtest::data::{load_market_series, load_yahoo, resample_annual};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "withdrawal_backtest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Backtest(args) => run_backtest(&args),
        Command::Declines(args) => run_declines(&args),
        Command::Solve(args) => run_solve(&args),
        Command::Serve(args) => {
            let market = load_market(&args.market)?;
            withdrawal_backtest::api::run_http_server(args.port, market)
                .await
                .context("HTTP server failed")
        }
    }
}

fn load_market(args: &MarketArgs) -> Result<Vec<MarketTick>> {
    load_market_series(&args.shiller, args.tbill.as_deref())
        .with_context(|| format!("loading market data from {}", args.shiller.display()))
}

fn market_for(args: &BacktestArgs, inputs: &Inputs) -> Result<Vec<MarketTick>> {
    let market = load_market(&args.market)?;
    Ok(if inputs.ticks_per_year == 1 {
        resample_annual(&market, 12)
    } else {
        market
    })
}

fn run_backtest(args: &BacktestArgs) -> Result<()> {
    let inputs = build_inputs(args).map_err(|e| anyhow!(e))?;
    let market = market_for(args, &inputs)?;
    let result = sim_periods(&market, &inputs, &TracingObserver).context("backtest failed")?;
    print_json(&result)
}

fn run_solve(args: &SolveArgs) -> Result<()> {
    let inputs = build_inputs(&args.backtest).map_err(|e| anyhow!(e))?;
    let config = build_solve_config(args).map_err(|e| anyhow!(e))?;
    let market = market_for(&args.backtest, &inputs)?;
    let result =
        solve_max_withdrawal_rate(&market, &inputs, config).context("rate search failed")?;
    print_json(&result)
}

fn run_declines(args: &DeclinesArgs) -> Result<()> {
    if !args.min_percent.is_finite() || args.min_percent < 0.0 {
        return Err(anyhow!("--min-percent must be >= 0"));
    }
    let min_fraction = args.min_percent / 100.0;

    match args.yahoo.as_deref() {
        Some(path) => {
            let quotes = load_yahoo(path).with_context(|| describe(path))?;
            let found = declines(quotes)
                .filter(|d| d.percent >= min_fraction)
                .collect::<Vec<_>>();
            report_declines(&found, args.json)
        }
        None => {
            let market = load_market(&args.market)?;
            let found = declines(market)
                .filter(|d| d.percent >= min_fraction)
                .collect::<Vec<_>>();
            report_declines(&found, args.json)
        }
    }
}

fn report_declines<T>(found: &[T], json: bool) -> Result<()>
where
    T: serde::Serialize + std::fmt::Display,
{
    if json {
        return print_json(&found);
    }
    for decline in found {
        println!("{decline}");
    }
    Ok(())
}

fn describe(path: &Path) -> String {
    format!("loading Yahoo prices from {}", path.display())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing result")?;
    println!("{json}");
    Ok(())
}
