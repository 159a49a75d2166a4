//! Race-day pipeline
//!
//! decode -> assemble -> estimate -> synthesize -> approve, run to
//! completion for one day before any bet leaves the core. Bankroll state is
//! only touched when the day is settled.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::bankroll::{BankrollController, DayBook, DaySummary, StakeDecision};
use crate::core::settlement::{settle_bet, total_returned, SettledBet, Settlement};
use crate::core::synthesizer::{BetSynthesizer, StrategyConfig};
use crate::data::assembler::EntityAssembler;
use crate::data::features::SkipReason;
use crate::data::feed::RawRecord;
use crate::data::parser::RecordDecoder;
use crate::error::BankrollError;
use crate::models::{Bet, Prediction, Race, RaceId};
use crate::predictor::{Estimate, Estimator};

/// Counts from one ingest pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestStats {
    pub decoded: usize,
    /// Rejections by reason label
    pub rejected: BTreeMap<&'static str, usize>,
}

impl IngestStats {
    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn merge(&mut self, other: &IngestStats) {
        self.decoded += other.decoded;
        for (reason, n) in &other.rejected {
            *self.rejected.entry(*reason).or_default() += n;
        }
    }
}

/// Everything the engine concluded about one race
#[derive(Debug, Clone, Serialize)]
pub struct RacePlan {
    pub race: Race,
    pub predictions: Vec<Prediction>,
    pub skipped: Vec<(u8, SkipReason)>,
    pub candidates: Vec<Bet>,
}

/// A day's recommendations plus the open ledger they were approved against
#[derive(Debug, Clone, Serialize)]
pub struct DayPlan {
    pub date: NaiveDate,
    pub races: Vec<RacePlan>,
    pub decisions: Vec<StakeDecision>,
    pub book: DayBook,
}

impl DayPlan {
    /// Bets to hand to the executor
    pub fn approved_bets(&self) -> &[Bet] {
        self.book.approved()
    }

    pub fn candidate_count(&self) -> usize {
        self.races.iter().map(|r| r.candidates.len()).sum()
    }
}

/// Settled result of a closed day
#[derive(Debug, Clone, Serialize)]
pub struct SettledDay {
    pub bets: Vec<SettledBet>,
    pub summary: DaySummary,
}

pub struct RaceDayPipeline {
    decoder: RecordDecoder,
    assembler: EntityAssembler,
    estimator: Estimator,
    synthesizer: BetSynthesizer,
}

impl RaceDayPipeline {
    pub fn new(estimator: Estimator, strategy: StrategyConfig) -> Self {
        Self {
            decoder: RecordDecoder::new(),
            assembler: EntityAssembler::new(),
            estimator,
            synthesizer: BetSynthesizer::new(strategy),
        }
    }

    pub fn assembler(&self) -> &EntityAssembler {
        &self.assembler
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Decode and absorb records; rejected records are counted, never fatal
    pub fn ingest<'a>(&mut self, records: impl IntoIterator<Item = &'a RawRecord>) -> IngestStats {
        let mut stats = IngestStats::default();

        for record in records {
            match self.decoder.decode_as(&record.bytes, record.data_spec) {
                Ok(typed) => {
                    self.assembler.absorb(typed);
                    stats.decoded += 1;
                }
                Err(rejection) => {
                    debug!(
                        data_spec = %record.data_spec,
                        tag = %record.record_tag,
                        "rejected: {}",
                        rejection
                    );
                    *stats.rejected.entry(rejection.reason()).or_default() += 1;
                }
            }
        }

        let history = self.assembler.history();
        info!(
            "Ingested {} records ({} rejected), {} races, {} horses with {} past runs, {} results awaiting a card",
            stats.decoded,
            stats.total_rejected(),
            self.assembler.race_count(),
            history.horse_count(),
            history.total_races(),
            self.assembler.pending_results()
        );
        stats
    }

    pub fn plan_race(&self, race_id: RaceId) -> Option<RacePlan> {
        let snapshot = self.assembler.snapshot(race_id)?;

        let mut predictions = Vec::new();
        let mut skipped = Vec::new();
        for estimate in self.estimator.estimate_race(&snapshot) {
            match estimate {
                Estimate::Predicted(p) => predictions.push(p),
                Estimate::Skipped {
                    horse_number,
                    reason,
                } => skipped.push((horse_number, reason)),
            }
        }

        let candidates = self.synthesizer.synthesize(&predictions);

        Some(RacePlan {
            race: snapshot.race,
            predictions,
            skipped,
            candidates,
        })
    }

    /// Plan every race on `date` in race-key order and approve candidates
    /// against a freshly opened day. The controller itself is not modified.
    pub fn plan_day(
        &self,
        date: NaiveDate,
        controller: &BankrollController,
    ) -> Result<DayPlan, BankrollError> {
        let mut book = controller.open_day(date)?;

        let races: Vec<RacePlan> = self
            .assembler
            .races_on(date)
            .into_iter()
            .filter_map(|id| self.plan_race(id))
            .collect();

        let decisions = races
            .iter()
            .flat_map(|r| r.candidates.iter())
            .map(|bet| book.approve(bet))
            .collect::<Vec<_>>();

        info!(
            "{}: {} races, {} candidates, {} approved, {} of {} yen",
            date,
            races.len(),
            decisions.len(),
            book.approved().len(),
            book.spent(),
            book.daily_cap
        );

        Ok(DayPlan {
            date,
            races,
            decisions,
            book,
        })
    }

    fn grade(&self, bet: &Bet) -> SettledBet {
        settle_bet(bet, self.assembler.outcome(bet.race_id))
    }

    /// Grade the book's bets against known outcomes and commit the day.
    ///
    /// While any approved bet still lacks a payout record the day stays
    /// open: the controller is left untouched and `UnsettledBets` is
    /// returned, so the same day can be settled once results arrive.
    pub fn settle_day(
        &self,
        book: DayBook,
        controller: &mut BankrollController,
    ) -> Result<SettledDay, BankrollError> {
        let bets: Vec<SettledBet> = book.approved().iter().map(|bet| self.grade(bet)).collect();

        let unsettled = bets
            .iter()
            .filter(|b| b.settlement == Settlement::Unsettled)
            .count();
        if unsettled > 0 {
            warn!(date = %book.date, unsettled, "day left open: payouts missing");
            return Err(BankrollError::UnsettledBets {
                date: book.date,
                count: unsettled,
            });
        }

        let summary = controller.close_day(book, total_returned(&bets))?;
        Ok(SettledDay { bets, summary })
    }

    /// Commit the day with bets that never got a payout record voided.
    ///
    /// Voided stakes are refunded to the book before closing; the bets are
    /// still reported, graded `Unsettled` with zero profit.
    pub fn settle_day_voiding_unsettled(
        &self,
        mut book: DayBook,
        controller: &mut BankrollController,
    ) -> Result<SettledDay, BankrollError> {
        let voided = book.void_where(|bet| self.grade(bet).settlement == Settlement::Unsettled);
        if !voided.is_empty() {
            warn!(
                date = %book.date,
                voided = voided.len(),
                "voiding bets without a payout record"
            );
        }

        let mut bets: Vec<SettledBet> = book.approved().iter().map(|bet| self.grade(bet)).collect();
        let summary = controller.close_day(book, total_returned(&bets))?;
        bets.extend(voided.iter().map(|bet| self.grade(bet)));
        Ok(SettledDay { bets, summary })
    }
}
