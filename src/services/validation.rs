// src/services/validation.rs
use thiserror::Error;

use crate::models::Period;

pub const MAX_TICKER_LEN: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid ticker symbol")]
    InvalidTicker,
    #[error("Invalid period")]
    InvalidPeriod,
}

/// Rejects empty tickers and tickers longer than five characters.
/// Case is kept as received.
pub fn validate_ticker(ticker: &str) -> Result<(), ValidationError> {
    if ticker.is_empty() || ticker.chars().count() > MAX_TICKER_LEN {
        return Err(ValidationError::InvalidTicker);
    }
    Ok(())
}

pub fn validate_period(period: &str) -> Result<Period, ValidationError> {
    period.parse()
}
