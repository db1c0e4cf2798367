use chrono::NaiveDate;
use serde::Serialize;

use super::error::SimError;

/// `dividend` is the trailing twelve-month dividend per share and
/// `risk_free_rate` an annual fraction. Values the source did not publish
/// stay `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTick {
    pub date: NaiveDate,
    pub price: f64,
    pub dividend: Option<f64>,
    pub cpi: Option<f64>,
    pub risk_free_rate: f64,
}

impl MarketTick {
    pub fn is_complete(&self) -> bool {
        self.dividend.is_some() && self.cpi.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashCushionRule {
    /// Cash target, in years of the current annual withdrawal.
    pub target_years: f64,
    pub use_threshold: f64,
    pub rebuild_threshold: f64,
    pub rebuild_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AllocationStrategy {
    AllStock,
    FixedRatio { cash_fraction: f64 },
    CashCushion(CashCushionRule),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayCutRule {
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaiseRule {
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatchetRule {
    pub to_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WithdrawalRules {
    pub paycut: Option<PayCutRule>,
    pub raise: Option<RaiseRule>,
    pub ratchet: Option<RatchetRule>,
}

#[derive(Debug, Clone)]
pub struct Inputs {
    pub withdrawals_per_year: u32,
    pub ticks_per_year: u32,
    pub annual_withdrawal_rate: f64,
    pub initial_balance: f64,
    /// Window length in raw ticks.
    pub period_length: usize,
    pub allocation: AllocationStrategy,
    pub withdrawal_rules: WithdrawalRules,
    pub keep_history: bool,
}

impl Default for Inputs {
    fn default() -> Self {
        Self {
            withdrawals_per_year: 4,
            ticks_per_year: 12,
            annual_withdrawal_rate: 0.04,
            initial_balance: 1_000_000.0,
            period_length: 360,
            allocation: AllocationStrategy::AllStock,
            withdrawal_rules: WithdrawalRules::default(),
            keep_history: false,
        }
    }
}

impl Inputs {
    /// Raw ticks skipped between two withdrawals.
    pub fn tick_stride(&self) -> usize {
        (self.ticks_per_year / self.withdrawals_per_year.max(1)).max(1) as usize
    }

    pub fn initial_annual_withdrawal(&self) -> f64 {
        round_cents(self.initial_balance * self.annual_withdrawal_rate)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.withdrawals_per_year == 0 {
            return invalid("withdrawals_per_year must be > 0");
        }
        if self.ticks_per_year == 0 {
            return invalid("ticks_per_year must be > 0");
        }
        if self.ticks_per_year % self.withdrawals_per_year != 0 {
            return invalid("ticks_per_year must be a multiple of withdrawals_per_year");
        }
        if !self.initial_balance.is_finite() || self.initial_balance <= 0.0 {
            return invalid("initial_balance must be > 0");
        }
        if !self.annual_withdrawal_rate.is_finite() || self.annual_withdrawal_rate < 0.0 {
            return invalid("annual_withdrawal_rate must be >= 0");
        }
        if self.period_length < self.tick_stride() {
            return invalid("period_length must cover at least one withdrawal");
        }

        match self.allocation {
            AllocationStrategy::AllStock => {}
            AllocationStrategy::FixedRatio { cash_fraction } => {
                if !(0.0..=1.0).contains(&cash_fraction) {
                    return invalid("cash_fraction must be between 0 and 1");
                }
            }
            AllocationStrategy::CashCushion(rule) => {
                if !rule.target_years.is_finite() || rule.target_years < 0.0 {
                    return invalid("cash_cushion_target must be >= 0");
                }
                if !rule.use_threshold.is_finite() || rule.use_threshold <= 0.0 {
                    return invalid("cash_use_threshold must be > 0");
                }
                if !rule.rebuild_threshold.is_finite() || rule.rebuild_threshold <= 0.0 {
                    return invalid("cash_rebuild_threshold must be > 0");
                }
                if !rule.rebuild_rate.is_finite() || rule.rebuild_rate < 1.0 {
                    return invalid("cash_rebuild_rate must be >= 1");
                }
            }
        }

        let rules = self.withdrawal_rules;
        if let Some(paycut) = rules.paycut {
            if !paycut.threshold.is_finite() || paycut.threshold <= 0.0 {
                return invalid("paycut_threshold must be > 0");
            }
            if !(0.0..1.0).contains(&paycut.rate) {
                return invalid("paycut_rate must be in [0, 1)");
            }
        }
        if let Some(raise) = rules.raise {
            if !raise.threshold.is_finite() || raise.threshold <= 0.0 {
                return invalid("raise_threshold must be > 0");
            }
            if !raise.rate.is_finite() || raise.rate <= 1.0 {
                return invalid("raise_rate must be > 1");
            }
        }
        if let Some(ratchet) = rules.ratchet {
            if !ratchet.to_rate.is_finite() || ratchet.to_rate <= 0.0 {
                return invalid("ratchet_to_rate must be > 0");
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), SimError> {
    Err(SimError::InvalidConfig(msg.to_string()))
}

/// Balance after the tick's withdrawal, dividend and interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioHistoryItem {
    pub date: NaiveDate,
    pub withdrawal_amount: f64,
    pub balance: f64,
    pub stock_price: f64,
    pub cpi: f64,
    pub cash: f64,
    pub shares: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub succeeded: bool,
    pub history: Vec<PortfolioHistoryItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub survived: bool,
    pub sustained: bool,
    pub min_real_balance: f64,
    pub max_real_balance: f64,
    pub ending_real_balance: f64,
    pub real_growth_rate: Option<f64>,
    pub withdrawal_growth_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<PortfolioHistoryItem>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthStats {
    pub median: f64,
    pub mean: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodsResult {
    pub window_count: usize,
    pub survived_count: usize,
    pub sustained_count: usize,
    pub survival_rate: f64,
    pub sustainability_rate: f64,
    pub earliest_start: NaiveDate,
    pub latest_start: NaiveDate,
    pub balance_growth: Option<GrowthStats>,
    pub withdrawal_growth: Option<GrowthStats>,
    pub periods: Vec<Period>,
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
