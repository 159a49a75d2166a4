//! Entity Assembler
//!
//! Merges decoded records into per-race tables (race, entrants, latest
//! quotes, outcome) and keeps per-horse history for lag features.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::data::history::HorseHistoryIndex;
use crate::data::parser::{CardRecord, EntrantResultRecord, PayoutRecord, TypedRecord};
use crate::models::{Entrant, ExactaQuote, OddsQuote, PriorResult, Race, RaceId, RaceOutcome};

#[derive(Debug)]
struct RaceTable {
    race: Race,
    cards: BTreeMap<u8, CardRecord>,
    odds: BTreeMap<u8, OddsQuote>,
    exacta: BTreeMap<(u8, u8), ExactaQuote>,
    outcome: RaceOutcome,
}

impl RaceTable {
    fn new(race_id: RaceId) -> Self {
        Self {
            race: Race::from_id(race_id),
            cards: BTreeMap::new(),
            odds: BTreeMap::new(),
            exacta: BTreeMap::new(),
            outcome: RaceOutcome::default(),
        }
    }
}

/// Race entities as of now, with lag features resolved for that race
#[derive(Debug, Clone, Serialize)]
pub struct RaceSnapshot {
    pub race: Race,
    /// Ordered by horse number
    pub entrants: Vec<Entrant>,
    /// Latest quote per horse, ordered by horse number
    pub odds: Vec<OddsQuote>,
    pub exacta: Vec<ExactaQuote>,
}

impl RaceSnapshot {
    pub fn field_size(&self) -> usize {
        self.entrants.len()
    }

    pub fn quote_for(&self, horse_number: u8) -> Option<&OddsQuote> {
        self.odds.iter().find(|q| q.horse_number == horse_number)
    }
}

/// In-memory race table fed by [`EntityAssembler::absorb`]
#[derive(Debug, Default)]
pub struct EntityAssembler {
    races: BTreeMap<RaceId, RaceTable>,
    history: HorseHistoryIndex,
    /// Horses established by at least one card record
    known_horses: HashSet<String>,
    /// Results for horses no card has introduced yet
    pending: HashMap<String, Vec<PriorResult>>,
}

impl EntityAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, record: TypedRecord) {
        match record {
            TypedRecord::Card(card) => self.absorb_card(card),
            TypedRecord::EntrantResult(result) => self.absorb_result(result),
            TypedRecord::Payout(payout) => self.absorb_payout(payout),
            TypedRecord::WinOdds(odds) => {
                let table = self.table(odds.race_id);
                for quote in odds.quotes {
                    table.odds.insert(quote.horse_number, quote);
                }
            }
            TypedRecord::ExactaOdds(odds) => {
                let table = self.table(odds.race_id);
                for quote in odds.quotes {
                    table.exacta.insert((quote.first, quote.second), quote);
                }
            }
        }
    }

    fn table(&mut self, race_id: RaceId) -> &mut RaceTable {
        self.races
            .entry(race_id)
            .or_insert_with(|| RaceTable::new(race_id))
    }

    fn absorb_card(&mut self, card: CardRecord) {
        let horse_id = card.horse_id.clone();
        self.table(card.race_id).cards.insert(card.horse_number, card);

        if self.known_horses.insert(horse_id.clone()) {
            if let Some(buffered) = self.pending.remove(&horse_id) {
                debug!(horse_id = %horse_id, results = buffered.len(), "releasing buffered results");
                for result in buffered {
                    self.history.record(&horse_id, result);
                }
            }
        }
    }

    fn absorb_result(&mut self, result: EntrantResultRecord) {
        let card = result.card;
        let table = self.table(card.race_id);
        if let Some(rank) = result.finish_rank {
            table.outcome.ranks.insert(card.horse_number, rank);
        }

        let prior = PriorResult {
            race_id: card.race_id,
            rank: result.finish_rank,
            pace_index: result.pace_index,
            late_speed: result.late_speed,
        };

        if self.known_horses.contains(&card.horse_id) {
            self.history.record(&card.horse_id, prior);
        } else {
            debug!(horse_id = %card.horse_id, race_id = %card.race_id, "buffering result for unknown horse");
            self.pending.entry(card.horse_id).or_default().push(prior);
        }
    }

    fn absorb_payout(&mut self, payout: PayoutRecord) {
        let outcome = &mut self.table(payout.race_id).outcome;
        outcome.win.extend(payout.win);
        outcome.place.extend(payout.place);
        outcome.wide.extend(payout.wide);
    }

    /// Entities of one race with lag features computed for that race
    pub fn snapshot(&self, race_id: RaceId) -> Option<RaceSnapshot> {
        let table = self.races.get(&race_id)?;

        let entrants = table
            .cards
            .values()
            .map(|card| {
                let history = self.history.get(&card.horse_id);
                Entrant {
                    race_id,
                    horse_number: card.horse_number,
                    horse_id: card.horse_id.clone(),
                    horse_name: card.horse_name.clone(),
                    bracket: card.bracket,
                    jockey: card.jockey.clone(),
                    trainer: card.trainer.clone(),
                    weight_kg: card.weight_kg,
                    sex: card.sex,
                    coat_code: card.coat_code.clone(),
                    age: card.age,
                    prior_results: history
                        .map(|h| h.prior_to(race_id).to_vec())
                        .unwrap_or_default(),
                    lag: history.and_then(|h| h.lag_for(race_id)),
                }
            })
            .collect();

        Some(RaceSnapshot {
            race: table.race.clone(),
            entrants,
            odds: table.odds.values().cloned().collect(),
            exacta: table.exacta.values().cloned().collect(),
        })
    }

    pub fn outcome(&self, race_id: RaceId) -> Option<&RaceOutcome> {
        self.races.get(&race_id).map(|t| &t.outcome)
    }

    /// Races held on `date`, in race-key order
    pub fn races_on(&self, date: NaiveDate) -> Vec<RaceId> {
        self.races
            .keys()
            .filter(|id| id.date == date)
            .copied()
            .collect()
    }

    pub fn race_dates(&self) -> BTreeSet<NaiveDate> {
        self.races.keys().map(|id| id.date).collect()
    }

    pub fn race_count(&self) -> usize {
        self.races.len()
    }

    /// Results still waiting for a card to introduce their horse
    pub fn pending_results(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn history(&self) -> &HorseHistoryIndex {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parser::RecordDecoder;
    use crate::data::testutil::*;

    const PAST: &str = "2026011006010101";
    const TODAY: &str = "2026020705010311";

    fn absorb(assembler: &mut EntityAssembler, raw: &[u8], data_spec: &str) {
        let record = RecordDecoder::new().decode(raw, data_spec).unwrap();
        assembler.absorb(record);
    }

    fn race(key: &str) -> RaceId {
        RaceId::parse(key).unwrap()
    }

    #[test]
    fn test_card_creates_race_and_entrant() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &card_record(TODAY, 2, "2019100002", "ニ"), "0B15");
        absorb(&mut asm, &card_record(TODAY, 1, "2019100001", "イチ"), "0B15");

        let snap = asm.snapshot(race(TODAY)).unwrap();
        assert_eq!(snap.race.venue, "東京");
        assert_eq!(snap.field_size(), 2);
        assert_eq!(snap.entrants[0].horse_number, 1);
        assert!(snap.entrants.iter().all(|e| e.lag.is_none()));
        assert!(asm.snapshot(race(PAST)).is_none());
    }

    #[test]
    fn test_card_resend_is_last_write_wins() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &card_record(TODAY, 5, "2019100005", "旧名"), "0B15");
        absorb(&mut asm, &card_record(TODAY, 5, "2019100005", "新名"), "0B15");

        let snap = asm.snapshot(race(TODAY)).unwrap();
        assert_eq!(snap.field_size(), 1);
        assert_eq!(snap.entrants[0].horse_name, "新名");
    }

    #[test]
    fn test_prior_result_feeds_lag() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &card_record(PAST, 3, "2019100003", "サン"), "0B15");
        absorb(&mut asm, &result_record(PAST, 3, "2019100003", Some(2), 348, 515), "0B12");
        absorb(&mut asm, &card_record(TODAY, 7, "2019100003", "サン"), "0B15");

        let past = asm.snapshot(race(PAST)).unwrap();
        assert!(past.entrants[0].lag.is_none());

        let today = asm.snapshot(race(TODAY)).unwrap();
        let entrant = &today.entrants[0];
        assert_eq!(entrant.prior_results.len(), 1);
        let lag = entrant.lag.unwrap();
        assert_eq!(lag.prev_rank, Some(2));
        assert!((lag.prev_late_speed.unwrap() - 34.8).abs() < 0.01);
    }

    #[test]
    fn test_result_before_card_is_buffered() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &result_record(PAST, 3, "2019100003", Some(1), 340, 520), "0B12");
        assert_eq!(asm.pending_results(), 1);
        assert!(asm.history().get("2019100003").is_none());

        absorb(&mut asm, &card_record(TODAY, 7, "2019100003", "サン"), "0B15");
        assert_eq!(asm.pending_results(), 0);

        let today = asm.snapshot(race(TODAY)).unwrap();
        assert_eq!(today.entrants[0].lag.unwrap().prev_rank, Some(1));
    }

    #[test]
    fn test_own_result_never_becomes_lag() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &card_record(PAST, 3, "2019100003", "サン"), "0B15");
        absorb(&mut asm, &result_record(PAST, 3, "2019100003", Some(4), 350, 500), "0B12");
        absorb(&mut asm, &card_record(TODAY, 7, "2019100003", "サン"), "0B15");
        absorb(&mut asm, &result_record(TODAY, 7, "2019100003", Some(1), 335, 530), "0B12");

        let today = asm.snapshot(race(TODAY)).unwrap();
        assert_eq!(today.entrants[0].lag.unwrap().prev_rank, Some(4));
        assert_eq!(today.entrants[0].prior_results.len(), 1);
    }

    #[test]
    fn test_latest_odds_win() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &win_odds_record(TODAY, &[(1, 3.0, 1), (2, 8.0, 2)]), "0B31");
        absorb(&mut asm, &win_odds_record(TODAY, &[(1, 4.2, 2)]), "0B31");

        let snap = asm.snapshot(race(TODAY)).unwrap();
        assert_eq!(snap.odds.len(), 2);
        let q = snap.quote_for(1).unwrap();
        assert!((q.win_odds - 4.2).abs() < 0.01);
        assert_eq!(q.popularity_rank, 2);
    }

    #[test]
    fn test_outcome_collects_ranks_and_payouts() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &result_record(PAST, 3, "2019100003", Some(1), 340, 520), "0B12");
        absorb(&mut asm, &payout_record(PAST, &[(3, 420)], &[(3, 160)], &[((3, 9), 780)]), "0B12");
        absorb(&mut asm, &exacta_odds_record(PAST, &[(3, 9, 21.5)]), "0B32");

        let outcome = asm.outcome(race(PAST)).unwrap();
        assert_eq!(outcome.ranks.get(&3), Some(&1));
        assert_eq!(outcome.win.get(&3), Some(&420));
        assert_eq!(outcome.wide_payout(9, 3), Some(780));
        assert_eq!(asm.snapshot(race(PAST)).unwrap().exacta.len(), 1);
    }

    #[test]
    fn test_races_on_date() {
        let mut asm = EntityAssembler::new();
        absorb(&mut asm, &card_record(TODAY, 1, "2019100001", "A"), "0B15");
        absorb(&mut asm, &card_record("2026020705010301", 1, "2019100002", "B"), "0B15");
        absorb(&mut asm, &card_record(PAST, 1, "2019100003", "C"), "0B15");

        let date = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        let races = asm.races_on(date);
        assert_eq!(races.len(), 2);
        assert_eq!(races[0].race_no, 1);
        assert_eq!(races[1].race_no, 11);
        assert_eq!(asm.race_dates().len(), 2);
        assert_eq!(asm.race_count(), 3);
    }
}
