use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::{
    AllocationStrategy, CashCushionRule, Inputs, PayCutRule, RaiseRule, RateSolveConfig,
    RatchetRule, WithdrawalRules,
};

#[derive(Parser, Debug)]
#[command(
    name = "withdrawal-backtest",
    about = "Historical backtests of retirement withdrawal policies (stock/cash split, cash cushion, pay cuts, raises, ratchets)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every historical window and report survival and growth.
    Backtest(BacktestArgs),
    /// List peak-to-trough declines and their recoveries.
    Declines(DeclinesArgs),
    /// Find the highest withdrawal rate that meets a survival target.
    Solve(SolveArgs),
    /// Serve the JSON API.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct MarketArgs {
    #[arg(
        long,
        default_value = "data/ie_data.csv",
        help = "Shiller monthly S&P composite data exported as CSV"
    )]
    pub shiller: PathBuf,
    #[arg(long, help = "FRED TB3MS export; without it cash earns nothing")]
    pub tbill: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    #[command(flatten)]
    pub market: MarketArgs,
    #[arg(long, default_value_t = 4)]
    pub withdrawals_per_year: u32,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Initial annual withdrawal in percent of the starting balance"
    )]
    pub withdrawal_rate: f64,
    #[arg(long, default_value_t = 1_000_000.0)]
    pub initial_balance: f64,
    #[arg(
        long,
        default_value_t = 360,
        help = "Window length in data rows (months, or years with --annual)"
    )]
    pub period_length: usize,
    #[arg(long, help = "Use December rows only, one tick per year")]
    pub annual: bool,

    #[arg(long, conflicts_with = "cash_fraction")]
    pub cash_cushion: bool,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Cash cushion size in years of withdrawals"
    )]
    pub cash_cushion_target: f64,
    #[arg(
        long,
        default_value_t = 0.9,
        help = "Spend the cushion when the balance is below this multiple of its high-water mark"
    )]
    pub cash_use_threshold: f64,
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Rebuild the cushion when the balance is above this multiple of its high-water mark"
    )]
    pub cash_rebuild_threshold: f64,
    #[arg(
        long,
        default_value_t = 1.5,
        help = "While rebuilding, sell this multiple of each withdrawal"
    )]
    pub cash_rebuild_rate: f64,
    #[arg(long, help = "Hold this fraction of the balance in cash, rebalanced at each withdrawal")]
    pub cash_fraction: Option<f64>,

    #[arg(long)]
    pub paycut: bool,
    #[arg(
        long,
        default_value_t = 0.8,
        help = "Cut pay when the balance is at or below this multiple of its high-water mark"
    )]
    pub paycut_threshold: f64,
    #[arg(long, default_value_t = 0.95)]
    pub paycut_rate: f64,
    #[arg(long)]
    pub raise: bool,
    #[arg(
        long,
        default_value_t = 1.1,
        help = "Raise pay when the balance is at least this multiple of a year ago"
    )]
    pub raise_threshold: f64,
    #[arg(long, default_value_t = 1.05)]
    pub raise_rate: f64,
    #[arg(long)]
    pub ratchet: bool,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Ratchet the withdrawal up to this percent of the current balance"
    )]
    pub ratchet_to_rate: f64,

    #[arg(long, help = "Include per-tick history for every window")]
    pub history: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DeclinesArgs {
    #[arg(long, help = "Yahoo Finance daily history CSV; defaults to the Shiller data")]
    pub yahoo: Option<PathBuf>,
    #[command(flatten)]
    pub market: MarketArgs,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Smallest decline to report, in percent"
    )]
    pub min_percent: f64,
    #[arg(long, help = "Print JSON instead of one line per decline")]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SolveArgs {
    #[command(flatten)]
    pub backtest: BacktestArgs,
    #[arg(long, default_value_t = 95.0, help = "Required survival rate in percent")]
    pub target_survival: f64,
    #[arg(long, default_value_t = 0.0, help = "Lowest rate to try, in percent")]
    pub search_min: f64,
    #[arg(long, default_value_t = 15.0, help = "Highest rate to try, in percent")]
    pub search_max: f64,
    #[arg(long, default_value_t = 0.01, help = "Solver tolerance, in percent")]
    pub tolerance: f64,
    #[arg(long, default_value_t = 32)]
    pub max_iterations: u32,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[command(flatten)]
    pub market: MarketArgs,
}

impl Default for BacktestArgs {
    fn default() -> Self {
        Self {
            market: MarketArgs {
                shiller: PathBuf::from("data/ie_data.csv"),
                tbill: None,
            },
            withdrawals_per_year: 4,
            withdrawal_rate: 4.0,
            initial_balance: 1_000_000.0,
            period_length: 360,
            annual: false,
            cash_cushion: false,
            cash_cushion_target: 2.0,
            cash_use_threshold: 0.9,
            cash_rebuild_threshold: 1.0,
            cash_rebuild_rate: 1.5,
            cash_fraction: None,
            paycut: false,
            paycut_threshold: 0.8,
            paycut_rate: 0.95,
            raise: false,
            raise_threshold: 1.1,
            raise_rate: 1.05,
            ratchet: false,
            ratchet_to_rate: 5.0,
            history: false,
        }
    }
}

pub fn build_inputs(args: &BacktestArgs) -> Result<Inputs, String> {
    if args.withdrawals_per_year == 0 {
        return Err("--withdrawals-per-year must be > 0".to_string());
    }
    let ticks_per_year = if args.annual { 1 } else { 12 };
    if ticks_per_year % args.withdrawals_per_year != 0 {
        return Err(format!(
            "--withdrawals-per-year must divide {ticks_per_year} (ticks per year)"
        ));
    }
    if !args.withdrawal_rate.is_finite() || !(0.0..=100.0).contains(&args.withdrawal_rate) {
        return Err("--withdrawal-rate must be between 0 and 100".to_string());
    }
    if !args.initial_balance.is_finite() || args.initial_balance <= 0.0 {
        return Err("--initial-balance must be > 0".to_string());
    }
    if args.period_length == 0 {
        return Err("--period-length must be > 0".to_string());
    }

    if args.cash_cushion && args.cash_fraction.is_some() {
        return Err("--cash-cushion and --cash-fraction cannot be combined".to_string());
    }
    let allocation = if args.cash_cushion {
        if args.cash_cushion_target < 0.0 {
            return Err("--cash-cushion-target must be >= 0".to_string());
        }
        if args.cash_use_threshold <= 0.0 {
            return Err("--cash-use-threshold must be > 0".to_string());
        }
        if args.cash_rebuild_threshold <= 0.0 {
            return Err("--cash-rebuild-threshold must be > 0".to_string());
        }
        if args.cash_rebuild_rate < 1.0 {
            return Err("--cash-rebuild-rate must be >= 1".to_string());
        }
        AllocationStrategy::CashCushion(CashCushionRule {
            target_years: args.cash_cushion_target,
            use_threshold: args.cash_use_threshold,
            rebuild_threshold: args.cash_rebuild_threshold,
            rebuild_rate: args.cash_rebuild_rate,
        })
    } else if let Some(cash_fraction) = args.cash_fraction {
        if !(0.0..=1.0).contains(&cash_fraction) {
            return Err("--cash-fraction must be between 0 and 1".to_string());
        }
        AllocationStrategy::FixedRatio { cash_fraction }
    } else {
        AllocationStrategy::AllStock
    };

    let mut rules = WithdrawalRules::default();
    if args.paycut {
        if args.paycut_threshold <= 0.0 {
            return Err("--paycut-threshold must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&args.paycut_rate) {
            return Err("--paycut-rate must be >= 0 and < 1".to_string());
        }
        rules.paycut = Some(PayCutRule {
            threshold: args.paycut_threshold,
            rate: args.paycut_rate,
        });
    }
    if args.raise {
        if args.raise_threshold <= 0.0 {
            return Err("--raise-threshold must be > 0".to_string());
        }
        if args.raise_rate <= 1.0 {
            return Err("--raise-rate must be > 1".to_string());
        }
        rules.raise = Some(RaiseRule {
            threshold: args.raise_threshold,
            rate: args.raise_rate,
        });
    }
    if args.ratchet {
        if args.ratchet_to_rate <= 0.0 || args.ratchet_to_rate > 100.0 {
            return Err("--ratchet-to-rate must be between 0 and 100".to_string());
        }
        rules.ratchet = Some(RatchetRule {
            to_rate: args.ratchet_to_rate / 100.0,
        });
    }

    let inputs = Inputs {
        withdrawals_per_year: args.withdrawals_per_year,
        ticks_per_year,
        annual_withdrawal_rate: args.withdrawal_rate / 100.0,
        initial_balance: args.initial_balance,
        period_length: args.period_length,
        allocation,
        withdrawal_rules: rules,
        keep_history: args.history,
    };
    inputs.validate().map_err(|e| e.to_string())?;
    Ok(inputs)
}

pub fn build_solve_config(args: &SolveArgs) -> Result<RateSolveConfig, String> {
    if !(0.0..=100.0).contains(&args.target_survival) {
        return Err("--target-survival must be between 0 and 100".to_string());
    }
    if args.search_min < 0.0 {
        return Err("--search-min must be >= 0".to_string());
    }
    if args.search_max <= args.search_min {
        return Err("--search-max must be > --search-min".to_string());
    }
    if args.tolerance <= 0.0 {
        return Err("--tolerance must be > 0".to_string());
    }
    if args.max_iterations == 0 {
        return Err("--max-iterations must be > 0".to_string());
    }
    Ok(RateSolveConfig {
        target_survival_rate: args.target_survival / 100.0,
        search_min: args.search_min / 100.0,
        search_max: args.search_max / 100.0,
        tolerance: args.tolerance / 100.0,
        max_iterations: args.max_iterations,
    })
}
