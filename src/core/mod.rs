//! Wagering decision engine: bet synthesis, sizing, bankroll and settlement

pub mod bankroll;
pub mod kelly;
pub mod settlement;
pub mod synthesizer;

// Re-export commonly used types
pub use bankroll::{
    BankrollConfig, BankrollController, BankrollMode, BankrollState, DayBook, DaySummary,
    RejectReason, StakeDecision,
};
pub use kelly::{calculate_kelly_fraction, KellySizing, SpearSizing};
pub use settlement::{settle_bet, total_returned, SettledBet, Settlement};
pub use synthesizer::{BetSynthesizer, StrategyConfig};
