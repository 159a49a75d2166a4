//! Keiba - JRA race feed decoder and EV wagering engine
//!
//! This library provides:
//! - Decoding of fixed-width Shift-JIS feed records into typed records
//! - Assembly of races, entrants and odds with leak-free lag features
//! - Win probability estimation (ONNX model or odds-based fallback)
//! - Spear (single WIN) and Shield (WIDE pair) bet synthesis
//! - A daily-cap bankroll controller with loss throttling
//! - Settlement and fund simulation over historical feeds
//!
//! # Example
//!
//! ```no_run
//! use keiba::core::{BankrollController, StrategyConfig};
//! use keiba::pipeline::RaceDayPipeline;
//! use keiba::predictor::Estimator;
//!
//! let mut pipeline = RaceDayPipeline::new(Estimator::fallback_only(), StrategyConfig::default());
//! let records: Vec<keiba::RawRecord> = Vec::new();
//! let stats = pipeline.ingest(&records);
//! println!("decoded {} records", stats.decoded);
//!
//! let controller = BankrollController::default();
//! let date = chrono::NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
//! let plan = pipeline.plan_day(date, &controller).unwrap();
//! for bet in plan.approved_bets() {
//!     println!("{} {} {} {}", bet.race_id, bet.bet_type, bet.selection, bet.stake_amount);
//! }
//! ```

pub mod backtesting;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod predictor;

// Re-export commonly used types
pub use config::EngineConfig;
pub use data::{DataSpec, RawRecord, RecordDecoder, TypedRecord};
pub use models::{Bet, BetType, Entrant, OddsQuote, Prediction, Race, RaceId, Selection};
pub use pipeline::{DayPlan, IngestStats, RaceDayPipeline};
pub use predictor::{Estimator, FallbackModel, WinModel};
