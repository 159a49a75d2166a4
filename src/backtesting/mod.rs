//! Fund simulation over historical feed records

pub mod metrics;
pub mod simulator;

pub use metrics::{analyze_by_bet_type, analyze_by_venue, calculate_metrics, BacktestMetrics};
pub use simulator::{BacktestConfig, BacktestResult, BetRecord, DayRecord, FundSimulator};
