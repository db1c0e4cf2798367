use rayon::prelude::*;
use tracing::info;

use super::engine::simulate_withdrawals;
use super::error::{SimError, SimResult};
use super::observer::{NoopObserver, SimulationObserver};
use super::types::{GrowthStats, Inputs, MarketTick, Period, PeriodsResult, round_cents};

/// Runs the simulation from every possible start tick, sliding one raw
/// tick at a time, and aggregates the outcomes.
pub fn sim_periods(
    market: &[MarketTick],
    inputs: &Inputs,
    observer: &dyn SimulationObserver,
) -> SimResult<PeriodsResult> {
    inputs.validate()?;
    let length = inputs.period_length;
    if market.len() < length {
        return Err(SimError::InsufficientData {
            required: length,
            available: market.len(),
        });
    }

    let periods = market
        .par_windows(length)
        .map(|window| {
            let period = evaluate_window(window, inputs, observer)?;
            observer.on_window(&period);
            Ok(period)
        })
        .collect::<SimResult<Vec<_>>>()?;

    let result = summarize_periods(periods);
    info!(
        windows = result.window_count,
        survival_rate = result.survival_rate,
        sustainability_rate = result.sustainability_rate,
        earliest = %result.earliest_start,
        latest = %result.latest_start,
        "backtest complete"
    );
    Ok(result)
}

pub fn survival_rate(market: &[MarketTick], inputs: &Inputs) -> SimResult<f64> {
    let mut inputs = inputs.clone();
    inputs.keep_history = false;
    let result = sim_periods(market, &inputs, &NoopObserver)?;
    Ok(result.survival_rate)
}

fn evaluate_window(
    window: &[MarketTick],
    inputs: &Inputs,
    observer: &dyn SimulationObserver,
) -> SimResult<Period> {
    let outcome = simulate_withdrawals(window, inputs, observer)?;
    let history = outcome.history;
    let survived = outcome.succeeded;

    let base_cpi = history.first().map(|item| item.cpi).unwrap_or(1.0);
    let real_balances = history
        .iter()
        .map(|item| round_cents(item.balance * base_cpi / item.cpi))
        .collect::<Vec<_>>();
    let min_real_balance = real_balances.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max_real_balance = real_balances.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let ending_real_balance = real_balances.last().copied().unwrap_or(0.0);

    let years = window.len() as f64 / inputs.ticks_per_year as f64;
    let (real_growth_rate, withdrawal_growth_rate) = match (history.first(), history.last()) {
        (Some(first), Some(last)) if survived => {
            let real_last_withdrawal = last.withdrawal_amount * base_cpi / last.cpi;
            (
                Some(compound_rate(ending_real_balance, inputs.initial_balance, years)),
                (first.withdrawal_amount > 0.0).then(|| {
                    compound_rate(real_last_withdrawal, first.withdrawal_amount, years)
                }),
            )
        }
        _ => (None, None),
    };

    Ok(Period {
        start_date: window[0].date,
        end_date: window[window.len() - 1].date,
        survived,
        sustained: survived && ending_real_balance >= inputs.initial_balance,
        min_real_balance,
        max_real_balance,
        ending_real_balance,
        real_growth_rate,
        withdrawal_growth_rate,
        history: inputs.keep_history.then_some(history),
    })
}

fn compound_rate(end: f64, start: f64, years: f64) -> f64 {
    (end / start).powf(1.0 / years) - 1.0
}

fn summarize_periods(periods: Vec<Period>) -> PeriodsResult {
    let window_count = periods.len();
    let survived_count = periods.iter().filter(|p| p.survived).count();
    let sustained_count = periods.iter().filter(|p| p.sustained).count();

    let mut balance_rates = periods
        .iter()
        .filter_map(|p| p.real_growth_rate)
        .collect::<Vec<_>>();
    let mut withdrawal_rates = periods
        .iter()
        .filter_map(|p| p.withdrawal_growth_rate)
        .collect::<Vec<_>>();

    PeriodsResult {
        window_count,
        survived_count,
        sustained_count,
        survival_rate: ratio(survived_count, window_count),
        sustainability_rate: ratio(sustained_count, window_count),
        earliest_start: periods[0].start_date,
        latest_start: periods[window_count - 1].start_date,
        balance_growth: growth_stats(&mut balance_rates),
        withdrawal_growth: growth_stats(&mut withdrawal_rates),
        periods,
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn growth_stats(values: &mut [f64]) -> Option<GrowthStats> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(GrowthStats {
        median: percentile(values, 50.0),
        mean,
        stdev: variance.sqrt(),
    })
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
