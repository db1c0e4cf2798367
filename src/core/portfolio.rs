use super::error::WithdrawError;
use super::types::{AllocationStrategy, CashCushionRule, round_cents};

// Rounded balances can exceed the raw holdings by half a cent, so an exact
// drain may leave this much negative dust behind.
const DUST: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Funding {
    Shares,
    Cushion,
    CushionRebuild { rebuilt: f64 },
    Rebalance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    allocation: AllocationStrategy,
    shares: f64,
    cash: f64,
    max_balance_seen: f64,
    annual_withdrawal: f64,
}

impl Portfolio {
    pub fn new(allocation: AllocationStrategy, annual_withdrawal: f64) -> Self {
        Self {
            allocation,
            shares: 0.0,
            cash: 0.0,
            max_balance_seen: 0.0,
            annual_withdrawal,
        }
    }

    pub fn init(&mut self, initial_balance: f64, first_price: f64) {
        let cash = match self.allocation {
            AllocationStrategy::AllStock => 0.0,
            AllocationStrategy::FixedRatio { cash_fraction } => initial_balance * cash_fraction,
            AllocationStrategy::CashCushion(rule) => {
                (rule.target_years * self.annual_withdrawal).min(initial_balance)
            }
        };
        self.cash = cash;
        self.shares = (initial_balance - cash) / first_price;
        self.max_balance_seen = 0.0;
    }

    pub fn shares(&self) -> f64 {
        self.shares
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn max_balance_seen(&self) -> f64 {
        self.max_balance_seen
    }

    pub fn annual_withdrawal(&self) -> f64 {
        self.annual_withdrawal
    }

    pub fn set_annual_withdrawal(&mut self, annual_withdrawal: f64) {
        self.annual_withdrawal = annual_withdrawal;
    }

    pub fn balance(&self, price: f64) -> f64 {
        round_cents(self.cash + self.shares * price)
    }

    pub fn is_consistent(&self) -> bool {
        self.shares >= 0.0 && self.cash >= 0.0
    }

    pub fn receive_dividend(&mut self, dividend_per_share: f64, price: f64) {
        let proceeds = self.shares * dividend_per_share;
        self.shares += proceeds / price;
    }

    pub fn receive_interest(&mut self, period_rate: f64) {
        if self.cash > 0.0 {
            self.cash += self.cash * period_rate;
        }
    }

    pub fn withdraw(&mut self, amount: f64, price: f64) -> Result<Funding, WithdrawError> {
        let balance = self.balance(price);
        if balance < amount {
            return Err(WithdrawError::InsufficientFunds { balance, amount });
        }

        let funding = match self.allocation {
            AllocationStrategy::AllStock => self.withdraw_default(amount, price),
            AllocationStrategy::FixedRatio { cash_fraction } => {
                self.withdraw_and_rebalance(amount, price, cash_fraction)
            }
            AllocationStrategy::CashCushion(rule) => {
                self.withdraw_with_cushion(amount, price, balance, rule)
            }
        };
        Ok(funding)
    }

    fn withdraw_with_cushion(
        &mut self,
        amount: f64,
        price: f64,
        balance: f64,
        rule: CashCushionRule,
    ) -> Funding {
        if balance < self.max_balance_seen * rule.use_threshold {
            let from_cash = amount.min(self.cash);
            self.cash -= from_cash;
            self.shares -= (amount - from_cash) / price;
            self.settle_dust(price);
            return Funding::Cushion;
        }

        let balance_after = balance - amount;
        let rebuild_floor = self.max_balance_seen * rule.rebuild_threshold;
        let target = rule.target_years * self.annual_withdrawal;
        if balance_after > rebuild_floor && self.cash < target {
            // All three caps are applied together; their order cannot matter.
            let rebuilt = (amount * (rule.rebuild_rate - 1.0))
                .min(target - self.cash)
                .min(balance_after - rebuild_floor)
                .min(self.shares * price - amount)
                .max(0.0);
            if rebuilt > 0.0 {
                self.sell(amount, price);
                self.shares -= rebuilt / price;
                self.cash += rebuilt;
                self.settle_dust(price);
                return Funding::CushionRebuild { rebuilt };
            }
        }

        self.withdraw_default(amount, price)
    }

    fn withdraw_default(&mut self, amount: f64, price: f64) -> Funding {
        self.sell(amount, price);
        self.settle_dust(price);
        self.raise_high_water_mark(price);
        Funding::Shares
    }

    fn withdraw_and_rebalance(&mut self, amount: f64, price: f64, cash_fraction: f64) -> Funding {
        let remaining = (self.cash + self.shares * price - amount).max(0.0);
        self.cash = remaining * cash_fraction;
        self.shares = remaining * (1.0 - cash_fraction) / price;
        self.raise_high_water_mark(price);
        Funding::Rebalance
    }

    /// Sells shares first and covers any gap from cash.
    fn sell(&mut self, amount: f64, price: f64) {
        let from_shares = amount.min(self.shares * price).max(0.0);
        self.shares -= from_shares / price;
        self.cash -= amount - from_shares;
    }

    fn raise_high_water_mark(&mut self, price: f64) {
        let balance = self.balance(price);
        if balance > self.max_balance_seen {
            self.max_balance_seen = balance;
        }
    }

    fn settle_dust(&mut self, price: f64) {
        if self.shares < 0.0 && self.shares * price > -DUST {
            self.shares = 0.0;
        }
        if self.cash < 0.0 && self.cash > -DUST {
            self.cash = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn cushion_rule() -> CashCushionRule {
        CashCushionRule {
            target_years: 2.0,
            use_threshold: 0.9,
            rebuild_threshold: 1.0,
            rebuild_rate: 1.5,
        }
    }

    fn cushion_portfolio(rule: CashCushionRule) -> Portfolio {
        let mut portfolio = Portfolio::new(AllocationStrategy::CashCushion(rule), 40_000.0);
        portfolio.init(1_000_000.0, 100.0);
        portfolio
    }

    #[test]
    fn init_all_stock_buys_only_shares() {
        let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, 40_000.0);
        portfolio.init(1_000_000.0, 100.0);
        assert_approx(portfolio.shares(), 10_000.0);
        assert_approx(portfolio.cash(), 0.0);
        assert_approx(portfolio.max_balance_seen(), 0.0);
        assert_approx(portfolio.balance(100.0), 1_000_000.0);
    }

    #[test]
    fn init_cushion_reserves_years_of_withdrawals() {
        let portfolio = cushion_portfolio(cushion_rule());
        assert_approx(portfolio.cash(), 80_000.0);
        assert_approx(portfolio.shares(), 9_200.0);
    }

    #[test]
    fn init_cushion_is_clamped_to_balance() {
        let mut rule = cushion_rule();
        rule.target_years = 50.0;
        let portfolio = cushion_portfolio(rule);
        assert_approx(portfolio.cash(), 1_000_000.0);
        assert_approx(portfolio.shares(), 0.0);
    }

    #[test]
    fn init_fixed_ratio_splits_balance() {
        let mut portfolio =
            Portfolio::new(AllocationStrategy::FixedRatio { cash_fraction: 0.2 }, 40_000.0);
        portfolio.init(1_000_000.0, 50.0);
        assert_approx(portfolio.cash(), 200_000.0);
        assert_approx(portfolio.shares(), 16_000.0);
    }

    #[test]
    fn reinit_resets_high_water_mark() {
        let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, 40_000.0);
        portfolio.init(1_000_000.0, 100.0);
        portfolio.withdraw(10_000.0, 100.0).expect("affordable");
        assert!(portfolio.max_balance_seen() > 0.0);
        portfolio.init(1_000_000.0, 100.0);
        assert_approx(portfolio.max_balance_seen(), 0.0);
    }

    #[test]
    fn interest_is_noop_without_cash() {
        let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, 40_000.0);
        portfolio.init(1_000.0, 10.0);
        portfolio.receive_interest(0.05);
        assert_approx(portfolio.cash(), 0.0);

        let mut portfolio = cushion_portfolio(cushion_rule());
        portfolio.receive_interest(0.01);
        assert_approx(portfolio.cash(), 80_800.0);
    }

    #[test]
    fn overdraw_is_reported_and_leaves_state_untouched() {
        let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, 40_000.0);
        portfolio.init(1_000_000.0, 100.0);
        let before = portfolio.clone();

        let err = portfolio
            .withdraw(10_000.01, 1.0)
            .expect_err("10,000 shares at $1 cannot fund $10,000.01");
        assert_eq!(
            err,
            WithdrawError::InsufficientFunds {
                balance: 10_000.0,
                amount: 10_000.01
            }
        );
        assert_eq!(portfolio, before);
    }

    #[test]
    fn exact_drain_leaves_no_negative_dust() {
        let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, 40_000.0);
        portfolio.init(1_000.0, 3.0);
        let funding = portfolio.withdraw(1_000.0, 3.0).expect("exactly affordable");
        assert_eq!(funding, Funding::Shares);
        assert!(portfolio.is_consistent());
        assert_approx(portfolio.balance(3.0), 0.0);
    }

    #[test]
    fn cushion_is_used_after_a_decline_and_rebuilt_after_recovery() {
        let mut portfolio = cushion_portfolio(cushion_rule());

        let funding = portfolio.withdraw(10_000.0, 100.0).expect("affordable");
        assert_eq!(funding, Funding::Shares);
        assert_approx(portfolio.shares(), 9_100.0);
        assert_approx(portfolio.cash(), 80_000.0);
        assert_approx(portfolio.max_balance_seen(), 990_000.0);

        // 808,000 < 990,000 * 0.9
        let funding = portfolio.withdraw(10_000.0, 80.0).expect("affordable");
        assert_eq!(funding, Funding::Cushion);
        assert_approx(portfolio.shares(), 9_100.0);
        assert_approx(portfolio.cash(), 70_000.0);
        assert_approx(portfolio.max_balance_seen(), 990_000.0);

        let funding = portfolio.withdraw(10_000.0, 120.0).expect("affordable");
        assert_eq!(funding, Funding::CushionRebuild { rebuilt: 5_000.0 });
        assert_approx(portfolio.shares(), 8_975.0);
        assert_approx(portfolio.cash(), 75_000.0);
        assert_approx(portfolio.balance(120.0), 1_152_000.0);
        assert_approx(portfolio.max_balance_seen(), 990_000.0);
    }

    #[test]
    fn cushion_use_sells_shares_once_cash_runs_out() {
        let mut portfolio = cushion_portfolio(cushion_rule());
        portfolio.withdraw(10_000.0, 100.0).expect("affordable");

        let funding = portfolio.withdraw(100_000.0, 50.0).expect("affordable");
        assert_eq!(funding, Funding::Cushion);
        assert_approx(portfolio.cash(), 0.0);
        assert_approx(portfolio.shares(), 9_100.0 - 20_000.0 / 50.0);
    }

    #[test]
    fn rebuild_is_capped_by_headroom_above_threshold() {
        let mut rule = cushion_rule();
        rule.rebuild_threshold = 1.16;
        let mut portfolio = cushion_portfolio(rule);
        portfolio.withdraw(10_000.0, 100.0).expect("affordable");
        portfolio.withdraw(10_000.0, 80.0).expect("affordable");

        // 1,152,000 after withdrawal, floor 990,000 * 1.16 = 1,148,400
        let funding = portfolio.withdraw(10_000.0, 120.0).expect("affordable");
        match funding {
            Funding::CushionRebuild { rebuilt } => assert_approx(rebuilt, 3_600.0),
            other => panic!("expected rebuild, got {other:?}"),
        }
        assert_approx(portfolio.cash(), 73_600.0);
    }

    #[test]
    fn rebuild_is_capped_by_cash_target() {
        let mut rule = cushion_rule();
        rule.rebuild_rate = 3.0;
        let mut portfolio = cushion_portfolio(rule);
        portfolio.withdraw(10_000.0, 100.0).expect("affordable");
        portfolio.withdraw(10_000.0, 80.0).expect("affordable");

        let funding = portfolio.withdraw(10_000.0, 120.0).expect("affordable");
        assert_eq!(funding, Funding::CushionRebuild { rebuilt: 10_000.0 });
        assert_approx(portfolio.cash(), 80_000.0);
    }

    #[test]
    fn fixed_ratio_rebalances_after_withdrawal() {
        let mut portfolio =
            Portfolio::new(AllocationStrategy::FixedRatio { cash_fraction: 0.1 }, 40_000.0);
        portfolio.init(1_000_000.0, 100.0);

        let funding = portfolio.withdraw(40_000.0, 200.0).expect("affordable");
        assert_eq!(funding, Funding::Rebalance);
        // 100,000 cash + 9,000 shares * 200 - 40,000
        assert_approx(portfolio.balance(200.0), 1_860_000.0);
        assert_approx(portfolio.cash(), 186_000.0);
        assert_approx(portfolio.shares(), 1_674_000.0 / 200.0);
        assert_approx(portfolio.max_balance_seen(), 1_860_000.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(48))]

        #[test]
        fn prop_flat_price_withdrawals_reduce_balance_exactly(
            initial in 10_000u32..5_000_000,
            price_cents in 100u32..100_000,
            withdrawal in 1u32..10_000,
            steps in 1usize..20,
        ) {
            let price = price_cents as f64 / 100.0;
            let initial = initial as f64;
            let withdrawal = withdrawal as f64;
            let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, withdrawal);
            portfolio.init(initial, price);

            let mut expected = portfolio.balance(price);
            for _ in 0..steps {
                if expected < withdrawal {
                    prop_assert!(portfolio.withdraw(withdrawal, price).is_err());
                    break;
                }
                portfolio.withdraw(withdrawal, price).expect("affordable");
                expected = round_cents(expected - withdrawal);
                prop_assert!((portfolio.balance(price) - expected).abs() <= 0.011);
                expected = portfolio.balance(price);
                prop_assert!(portfolio.is_consistent());
            }
        }

        #[test]
        fn prop_positive_dividend_strictly_increases_balance(
            initial in 1_000u32..5_000_000,
            price_cents in 100u32..100_000,
            dividend_bp in 1u32..500,
        ) {
            let price = price_cents as f64 / 100.0;
            let mut portfolio = Portfolio::new(AllocationStrategy::AllStock, 40_000.0);
            portfolio.init(initial as f64, price);
            let before = portfolio.shares() * price;
            portfolio.receive_dividend(price * dividend_bp as f64 / 10_000.0, price);
            prop_assert!(portfolio.shares() * price > before);
            prop_assert!(portfolio.balance(price) >= round_cents(before));
        }

        #[test]
        fn prop_cushion_never_goes_negative(
            moves in proptest::collection::vec(-300i32..300, 1..60),
            withdrawal in 1_000u32..40_000,
            use_bp in 5_000u32..10_000,
            rebuild_bp in 8_000u32..13_000,
            rate_bp in 10_000u32..30_000,
        ) {
            let rule = CashCushionRule {
                target_years: 2.0,
                use_threshold: use_bp as f64 / 10_000.0,
                rebuild_threshold: rebuild_bp as f64 / 10_000.0,
                rebuild_rate: rate_bp as f64 / 10_000.0,
            };
            let mut portfolio = Portfolio::new(
                AllocationStrategy::CashCushion(rule),
                withdrawal as f64 * 4.0,
            );
            let mut price = 100.0_f64;
            portfolio.init(1_000_000.0, price);

            for step in moves {
                price = (price * (1.0 + step as f64 / 1_000.0)).max(0.01);
                let before = portfolio.clone();
                match portfolio.withdraw(withdrawal as f64, price) {
                    Ok(_) => {
                        prop_assert!(portfolio.is_consistent());
                        prop_assert!(portfolio.max_balance_seen() >= before.max_balance_seen());
                    }
                    Err(_) => {
                        prop_assert_eq!(&portfolio, &before);
                        break;
                    }
                }
                portfolio.receive_interest(0.01);
                prop_assert!(portfolio.is_consistent());
            }
        }
    }
}
