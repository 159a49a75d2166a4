use chrono::NaiveDate;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Feed acquisition errors (file-backed record source)
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to read feed file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("feed directory not found: {0:?}")]
    MissingDirectory(PathBuf),
}

/// Probability model failures; always absorbed by the estimator
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model inference failed: {0}")]
    Inference(String),

    #[error("model returned {0}, expected a probability in [0, 1]")]
    OutOfRange(f64),

    #[error("failed to load model: {0}")]
    Load(String),
}

/// Bankroll lifecycle misuse
#[derive(Debug, Error, PartialEq)]
pub enum BankrollError {
    #[error("day {date} is not after the last settled day {last_settled}")]
    DayAlreadySettled {
        date: NaiveDate,
        last_settled: NaiveDate,
    },

    #[error("day {date} has {count} bets without a payout record")]
    UnsettledBets { date: NaiveDate, count: usize },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn validate_horse_number(horse_number: u8) -> Result<(), String> {
    if !(1..=18).contains(&horse_number) {
        return Err(format!(
            "Horse number must be between 1 and 18, got {}",
            horse_number
        ));
    }
    Ok(())
}

pub fn validate_odds(odds: f64) -> Result<(), String> {
    if !odds.is_finite() || odds < 1.0 {
        return Err(format!("Win odds must be at least 1.0, got {}", odds));
    }
    Ok(())
}

pub fn validate_probability(prob: f64) -> Result<(), ModelError> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(ModelError::OutOfRange(prob));
    }
    Ok(())
}
