use chrono::NaiveDate;
use thiserror::Error;

/// Faults that abort a simulation. Running out of money is not one of
/// them; see [`WithdrawError`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not enough market data: need {required} ticks, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Empty simulation window")]
    EmptyWindow,

    #[error("Tick {date} is missing {field}")]
    MissingField { date: NaiveDate, field: &'static str },

    #[error("Portfolio invariant violated at {date}: shares={shares}, cash={cash}")]
    InvariantViolation {
        date: NaiveDate,
        shares: f64,
        cash: f64,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum WithdrawError {
    #[error("Insufficient funds: balance {balance:.2} < withdrawal {amount:.2}")]
    InsufficientFunds { balance: f64, amount: f64 },
}

pub type SimResult<T> = Result<T, SimError>;
