use super::error::{SimError, SimResult, WithdrawError};
use super::observer::SimulationObserver;
use super::policy::{AnnualReview, WithdrawalPolicy};
use super::portfolio::Portfolio;
use super::types::{Inputs, MarketTick, PortfolioHistoryItem, SimulationOutcome, round_cents};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunnerState {
    Running,
    Failed,
    Complete,
}

pub struct SimulationRunner<'a> {
    inputs: &'a Inputs,
    ticks: Vec<&'a MarketTick>,
    cursor: usize,
    portfolio: Portfolio,
    policy: WithdrawalPolicy,
    period_withdrawal: f64,
    history: Vec<PortfolioHistoryItem>,
    state: RunnerState,
    observer: &'a dyn SimulationObserver,
}

impl<'a> SimulationRunner<'a> {
    pub fn new(
        window: &'a [MarketTick],
        inputs: &'a Inputs,
        observer: &'a dyn SimulationObserver,
    ) -> SimResult<Self> {
        let ticks = window
            .iter()
            .step_by(inputs.tick_stride())
            .collect::<Vec<_>>();
        let Some(first) = ticks.first() else {
            return Err(SimError::EmptyWindow);
        };

        let annual_withdrawal = inputs.initial_annual_withdrawal();
        let mut portfolio = Portfolio::new(inputs.allocation, annual_withdrawal);
        portfolio.init(inputs.initial_balance, first.price);

        Ok(Self {
            inputs,
            cursor: 0,
            portfolio,
            policy: WithdrawalPolicy::new(inputs.withdrawal_rules),
            period_withdrawal: round_cents(
                inputs.initial_balance * inputs.annual_withdrawal_rate
                    / inputs.withdrawals_per_year as f64,
            ),
            history: Vec::with_capacity(ticks.len()),
            state: RunnerState::Running,
            ticks,
            observer,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn history(&self) -> &[PortfolioHistoryItem] {
        &self.history
    }

    /// Processes the next tick. Returns `Running` while ticks remain.
    pub fn step(&mut self) -> SimResult<RunnerState> {
        if self.state != RunnerState::Running {
            return Ok(self.state);
        }
        let Some(tick) = self.ticks.get(self.cursor).copied() else {
            self.state = RunnerState::Complete;
            return Ok(self.state);
        };

        let cpi = tick.cpi.ok_or(SimError::MissingField {
            date: tick.date,
            field: "cpi",
        })?;
        let dividend = tick.dividend.ok_or(SimError::MissingField {
            date: tick.date,
            field: "dividend",
        })?;
        let periods_per_year = self.inputs.withdrawals_per_year as usize;
        let price = tick.price;

        let balance = self.portfolio.balance(price);
        if !self.history.is_empty() && self.history.len() % periods_per_year == 0 {
            let year_ago = self.history[self.history.len() - periods_per_year];
            let adjustment = self.policy.adjust(
                self.portfolio.annual_withdrawal(),
                &AnnualReview {
                    balance,
                    max_balance_seen: self.portfolio.max_balance_seen(),
                    balance_year_ago: year_ago.balance,
                    cpi,
                    cpi_year_ago: year_ago.cpi,
                },
            );
            self.portfolio
                .set_annual_withdrawal(adjustment.annual_withdrawal);
            self.period_withdrawal =
                round_cents(adjustment.annual_withdrawal / periods_per_year as f64);
            self.observer.on_adjustment(tick.date, &adjustment);
        }

        if balance < self.period_withdrawal {
            return Ok(self.fail(
                tick,
                WithdrawError::InsufficientFunds {
                    balance,
                    amount: self.period_withdrawal,
                },
            ));
        }
        let funding = match self.portfolio.withdraw(self.period_withdrawal, price) {
            Ok(funding) => funding,
            Err(err) => return Ok(self.fail(tick, err)),
        };

        self.portfolio
            .receive_dividend(dividend / periods_per_year as f64, price);
        if self.portfolio.cash() > 0.0 {
            self.portfolio
                .receive_interest(tick.risk_free_rate / periods_per_year as f64);
        }

        if !self.portfolio.is_consistent() {
            return Err(SimError::InvariantViolation {
                date: tick.date,
                shares: self.portfolio.shares(),
                cash: self.portfolio.cash(),
            });
        }

        let item = PortfolioHistoryItem {
            date: tick.date,
            withdrawal_amount: self.period_withdrawal,
            balance: self.portfolio.balance(price),
            stock_price: price,
            cpi,
            cash: self.portfolio.cash(),
            shares: self.portfolio.shares(),
        };
        self.observer.on_tick(&item, funding);
        self.history.push(item);
        self.cursor += 1;

        if self.cursor == self.ticks.len() {
            self.state = RunnerState::Complete;
        }
        Ok(self.state)
    }

    pub fn run(mut self) -> SimResult<SimulationOutcome> {
        while self.step()? == RunnerState::Running {}
        Ok(SimulationOutcome {
            succeeded: self.state == RunnerState::Complete,
            history: self.history,
        })
    }

    fn fail(&mut self, tick: &MarketTick, err: WithdrawError) -> RunnerState {
        self.observer.on_failure(tick.date, &err);
        self.state = RunnerState::Failed;
        self.state
    }
}

/// Runs one window to completion or to its first unaffordable withdrawal.
/// The failing tick is not part of the returned history.
pub fn simulate_withdrawals(
    window: &[MarketTick],
    inputs: &Inputs,
    observer: &dyn SimulationObserver,
) -> SimResult<SimulationOutcome> {
    SimulationRunner::new(window, inputs, observer)?.run()
}
