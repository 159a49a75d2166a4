//! Fund Simulator
//!
//! Replays historical feed records day by day through the same pipeline
//! used live, settling each day against its payout records so that the
//! bankroll throttle sees the losses it would have seen in production.

use super::metrics::{calculate_metrics, BacktestMetrics};
use crate::core::bankroll::{BankrollController, BankrollMode};
use crate::core::settlement::{SettledBet, Settlement};
use crate::error::BankrollError;
use crate::models::{BetType, RaceId, Selection};
use crate::pipeline::{IngestStats, RaceDayPipeline};
use crate::data::feed::RawRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Individual bet record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecord {
    pub date: NaiveDate,
    pub race_id: RaceId,
    pub bet_type: BetType,
    pub selection: Selection,
    pub stake: i64,
    pub settled: bool,
    pub won: bool,
    pub returned: i64,
    pub profit: i64,
    pub rationale_tag: String,
}

impl From<&SettledBet> for BetRecord {
    fn from(s: &SettledBet) -> Self {
        Self {
            date: s.bet.race_id.date,
            race_id: s.bet.race_id,
            bet_type: s.bet.bet_type,
            selection: s.bet.selection,
            stake: s.bet.stake_amount,
            settled: s.settlement != Settlement::Unsettled,
            won: s.is_hit(),
            returned: s.returned,
            profit: s.profit(),
            rationale_tag: s.bet.rationale_tag.clone(),
        }
    }
}

/// One simulated race day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub races: usize,
    pub candidates: usize,
    pub approved: usize,
    pub staked: i64,
    pub returned: i64,
    pub pnl: i64,
    pub balance: i64,
    pub mode_before: BankrollMode,
    pub mode_after: BankrollMode,
    /// Cap the day was opened with
    pub cap: i64,
    pub next_cap: i64,
}

/// Backtest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub ingest: IngestSummary,
    pub bets: Vec<BetRecord>,
    pub days: Vec<DayRecord>,
    pub metrics: BacktestMetrics,
}

/// Serializable view of the ingest pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub decoded: usize,
    pub rejected: usize,
}

impl From<&IngestStats> for IngestSummary {
    fn from(stats: &IngestStats) -> Self {
        Self {
            decoded: stats.decoded,
            rejected: stats.total_rejected(),
        }
    }
}

impl BacktestResult {
    pub fn total_profit(&self) -> i64 {
        self.days.iter().map(|d| d.pnl).sum()
    }
}

/// Date window for a simulation; `None` leaves the side open
#[derive(Debug, Clone, Default)]
pub struct BacktestConfig {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl BacktestConfig {
    fn contains(&self, date: NaiveDate) -> bool {
        self.start_date.map_or(true, |s| date >= s) && self.end_date.map_or(true, |e| date <= e)
    }
}

/// Fund simulator
pub struct FundSimulator {
    pub config: BacktestConfig,
    pipeline: RaceDayPipeline,
    controller: BankrollController,
    ingest: IngestStats,
}

impl FundSimulator {
    pub fn new(config: BacktestConfig, pipeline: RaceDayPipeline, controller: BankrollController) -> Self {
        Self {
            config,
            pipeline,
            controller,
            ingest: IngestStats::default(),
        }
    }

    /// Absorb the whole history up front; history before the window still
    /// feeds lag features
    pub fn load<'a>(&mut self, records: impl IntoIterator<Item = &'a RawRecord>) -> &IngestStats {
        let stats = self.pipeline.ingest(records);
        self.ingest.merge(&stats);
        &self.ingest
    }

    pub fn controller(&self) -> &BankrollController {
        &self.controller
    }

    /// Days the run will visit
    pub fn race_days(&self) -> Vec<NaiveDate> {
        self.pipeline
            .assembler()
            .race_dates()
            .into_iter()
            .filter(|d| self.config.contains(*d))
            .collect()
    }

    pub fn run(&mut self) -> Result<BacktestResult, BankrollError> {
        self.run_with_progress(|_| {})
    }

    /// Run the simulation, calling `on_day` after each day closes
    pub fn run_with_progress<F>(&mut self, mut on_day: F) -> Result<BacktestResult, BankrollError>
    where
        F: FnMut(&DayRecord),
    {
        let initial_balance = self.controller.state().balance;
        let mut bets = Vec::new();
        let mut days = Vec::new();

        for date in self.race_days() {
            let plan = self.pipeline.plan_day(date, &self.controller)?;
            let races = plan.races.len();
            let candidates = plan.candidate_count();
            let approved = plan.approved_bets().len();
            let cap = plan.book.daily_cap;

            // history never gains a late payout, so missing ones are void
            let settled = self
                .pipeline
                .settle_day_voiding_unsettled(plan.book, &mut self.controller)?;
            bets.extend(settled.bets.iter().map(BetRecord::from));

            let summary = settled.summary;
            let day = DayRecord {
                date,
                races,
                candidates,
                approved,
                staked: summary.staked,
                returned: summary.returned,
                pnl: summary.pnl,
                balance: summary.balance,
                mode_before: summary.mode_before,
                mode_after: summary.mode_after,
                cap,
                next_cap: summary.next_cap,
            };
            on_day(&day);
            days.push(day);
        }

        let metrics = calculate_metrics(&bets, &days, initial_balance);
        info!(
            "Backtest finished: {} days, {} bets, net {}",
            metrics.days, metrics.total_bets, metrics.net_profit
        );

        Ok(BacktestResult {
            ingest: IngestSummary::from(&self.ingest),
            bets,
            days,
            metrics,
        })
    }
}
