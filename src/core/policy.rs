use serde::Serialize;

use super::types::{WithdrawalRules, round_cents};

/// Portfolio facts gathered on a withdrawal anniversary, before that
/// tick's withdrawal.
#[derive(Debug, Clone, Copy)]
pub struct AnnualReview {
    pub balance: f64,
    pub max_balance_seen: f64,
    /// Recorded after that tick's withdrawal, unlike `balance`.
    pub balance_year_ago: f64,
    pub cpi: f64,
    pub cpi_year_ago: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdjustmentRule {
    PayCut,
    Raise,
    Ratchet,
    Inflation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAdjustment {
    pub rule: AdjustmentRule,
    pub previous: f64,
    pub annual_withdrawal: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WithdrawalPolicy {
    rules: WithdrawalRules,
}

impl WithdrawalPolicy {
    pub fn new(rules: WithdrawalRules) -> Self {
        Self { rules }
    }

    /// Picks the new annual withdrawal. Exactly one rule fires, checked in
    /// the order pay cut, raise, ratchet, inflation.
    pub fn adjust(&self, annual_withdrawal: f64, review: &AnnualReview) -> WithdrawalAdjustment {
        let (rule, next) = if let Some(paycut) = self
            .rules
            .paycut
            .filter(|p| review.balance <= review.max_balance_seen * p.threshold)
        {
            (AdjustmentRule::PayCut, annual_withdrawal * paycut.rate)
        } else if let Some(raise) = self
            .rules
            .raise
            .filter(|r| review.balance >= review.balance_year_ago * r.threshold)
        {
            (AdjustmentRule::Raise, annual_withdrawal * raise.rate)
        } else if let Some(ratchet) = self
            .rules
            .ratchet
            .filter(|r| annual_withdrawal < review.balance * r.to_rate)
        {
            (AdjustmentRule::Ratchet, review.balance * ratchet.to_rate)
        } else {
            (
                AdjustmentRule::Inflation,
                annual_withdrawal * review.cpi / review.cpi_year_ago,
            )
        };

        WithdrawalAdjustment {
            rule,
            previous: annual_withdrawal,
            annual_withdrawal: round_cents(next),
        }
    }
}
