use chrono::NaiveDate;
use tracing::{debug, trace};

use super::error::WithdrawError;
use super::policy::WithdrawalAdjustment;
use super::portfolio::Funding;
use super::types::{Period, PortfolioHistoryItem};

/// Hooks called at fixed points of a backtest. Windows may run on several
/// threads at once, so implementations must be `Sync`.
pub trait SimulationObserver: Sync {
    fn on_tick(&self, _item: &PortfolioHistoryItem, _funding: Funding) {}

    fn on_adjustment(&self, _date: NaiveDate, _adjustment: &WithdrawalAdjustment) {}

    fn on_failure(&self, _date: NaiveDate, _error: &WithdrawError) {}

    fn on_window(&self, _period: &Period) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SimulationObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SimulationObserver for TracingObserver {
    fn on_tick(&self, item: &PortfolioHistoryItem, funding: Funding) {
        trace!(
            date = %item.date,
            withdrawal = item.withdrawal_amount,
            balance = item.balance,
            cash = item.cash,
            price = item.stock_price,
            ?funding,
            "tick"
        );
    }

    fn on_adjustment(&self, date: NaiveDate, adjustment: &WithdrawalAdjustment) {
        debug!(
            %date,
            rule = ?adjustment.rule,
            previous = adjustment.previous,
            annual_withdrawal = adjustment.annual_withdrawal,
            "withdrawal adjusted"
        );
    }

    fn on_failure(&self, date: NaiveDate, error: &WithdrawError) {
        debug!(%date, %error, "window failed");
    }

    fn on_window(&self, period: &Period) {
        debug!(
            start = %period.start_date,
            survived = period.survived,
            sustained = period.sustained,
            ending_real_balance = period.ending_real_balance,
            "window finished"
        );
    }
}
