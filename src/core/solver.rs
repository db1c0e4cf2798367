use serde::Serialize;
use tracing::debug;

use super::backtest::survival_rate;
use super::error::{SimError, SimResult};
use super::types::{Inputs, MarketTick};

#[derive(Debug, Clone, Copy)]
pub struct RateSolveConfig {
    pub target_survival_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for RateSolveConfig {
    fn default() -> Self {
        Self {
            target_survival_rate: 0.95,
            search_min: 0.0,
            search_max: 0.15,
            tolerance: 0.000_1,
            max_iterations: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub survival_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateSolveResult {
    pub target_survival_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub solved_rate: Option<f64>,
    pub achieved_survival_rate: Option<f64>,
    pub iterations: Vec<RateSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Bisects for the highest annual withdrawal rate whose historical survival
/// rate still meets the target.
pub fn solve_max_withdrawal_rate(
    market: &[MarketTick],
    inputs: &Inputs,
    config: RateSolveConfig,
) -> SimResult<RateSolveResult> {
    validate_config(config)?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_rate = evaluate_rate(market, inputs, config.search_min)?;
    let high_rate = evaluate_rate(market, inputs, config.search_max)?;
    let meets = |rate: f64| rate + 1e-12 >= config.target_survival_rate;

    let mut solved_rate = None;
    let mut converged = false;
    let feasible;
    let message;

    if !meets(low_rate) {
        feasible = false;
        message = "No feasible withdrawal rate found within the search bounds.".to_string();
    } else if meets(high_rate) {
        solved_rate = Some(config.search_max);
        converged = true;
        feasible = true;
        message = "Upper rate bound is still feasible; increase search max for a higher rate."
            .to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let survival = evaluate_rate(market, inputs, mid)?;
            debug!(iteration = it, rate = mid, survival, "solver step");
            iterations.push(RateSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_rate: mid,
                survival_rate: survival,
            });

            if meets(survival) {
                lo = mid;
            } else {
                hi = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                solved_rate = Some(lo);
                break;
            }
        }
        if solved_rate.is_none() {
            solved_rate = Some(lo);
        }
        feasible = true;
        message = if converged {
            "Solved maximum withdrawal rate.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let achieved_survival_rate = match solved_rate {
        Some(rate) => Some(evaluate_rate(market, inputs, rate)?),
        None => None,
    };

    Ok(RateSolveResult {
        target_survival_rate: config.target_survival_rate,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        solved_rate,
        achieved_survival_rate,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn evaluate_rate(market: &[MarketTick], base_inputs: &Inputs, rate: f64) -> SimResult<f64> {
    let mut inputs = base_inputs.clone();
    inputs.annual_withdrawal_rate = rate.max(0.0);
    survival_rate(market, &inputs)
}

fn validate_config(config: RateSolveConfig) -> SimResult<()> {
    let invalid = |msg: &str| Err(SimError::InvalidConfig(msg.to_string()));
    if !(0.0..=1.0).contains(&config.target_survival_rate) {
        return invalid("target_survival_rate must be between 0 and 1");
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return invalid("search bounds must be finite");
    }
    if config.search_min < 0.0 {
        return invalid("search_min must be >= 0");
    }
    if config.search_max <= config.search_min {
        return invalid("search_max must be greater than search_min");
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return invalid("tolerance must be > 0");
    }
    if config.max_iterations == 0 {
        return invalid("max_iterations must be > 0");
    }
    Ok(())
}
