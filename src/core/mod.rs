mod backtest;
mod declines;
mod engine;
mod error;
mod observer;
mod policy;
mod portfolio;
mod solver;
mod types;

pub use backtest::{sim_periods, survival_rate};
pub use declines::{Decline, Declines, PricePoint, declines};
pub use engine::{RunnerState, SimulationRunner, simulate_withdrawals};
pub use error::{SimError, SimResult, WithdrawError};
pub use observer::{NoopObserver, SimulationObserver, TracingObserver};
pub use policy::{AdjustmentRule, AnnualReview, WithdrawalAdjustment, WithdrawalPolicy};
pub use portfolio::{Funding, Portfolio};
pub use solver::{RateSolveConfig, RateSolveIteration, RateSolveResult, solve_max_withdrawal_rate};
pub use types::{
    AllocationStrategy, CashCushionRule, GrowthStats, Inputs, MarketTick, PayCutRule, Period,
    PeriodsResult, PortfolioHistoryItem, RaiseRule, RatchetRule, SimulationOutcome,
    WithdrawalRules, round_cents,
};
