//! Horse History Index
//!
//! Per-horse past results kept as immutable, race-ordered sequences. Lag
//! features are read with index arithmetic on that sequence, so the value a
//! race sees always comes from an earlier race.

use std::collections::HashMap;

use crate::models::{LagFeatures, PriorResult, RaceId};

/// Time-sorted results of one horse, oldest first, one entry per race
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HorseHistory {
    results: Vec<PriorResult>,
}

impl HorseHistory {
    pub fn from_results(results: impl IntoIterator<Item = PriorResult>) -> Self {
        results
            .into_iter()
            .fold(Self::default(), |history, r| history.with_result(r))
    }

    /// New history with `result` in race order; a resent result replaces the old one
    pub fn with_result(&self, result: PriorResult) -> Self {
        let mut results = self.results.clone();
        match results.binary_search_by(|r| r.race_id.cmp(&result.race_id)) {
            Ok(idx) => results[idx] = result,
            Err(idx) => results.insert(idx, result),
        }
        Self { results }
    }

    pub fn results(&self) -> &[PriorResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results of races strictly before `race_id`
    pub fn prior_to(&self, race_id: RaceId) -> &[PriorResult] {
        let idx = self.results.partition_point(|r| r.race_id < race_id);
        &self.results[..idx]
    }

    /// Lag features as seen by `race_id`.
    ///
    /// The race's timeline is every earlier result followed by the race
    /// itself; the lag is the second-to-last element of that timeline.
    /// `None` when the timeline has fewer than two races.
    pub fn lag_for(&self, race_id: RaceId) -> Option<LagFeatures> {
        let prior = self.prior_to(race_id);
        let timeline_len = prior.len() + 1;
        if timeline_len < 2 {
            return None;
        }

        let prev = &prior[timeline_len - 2];
        Some(LagFeatures {
            prev_rank: prev.rank,
            prev_pace_index: prev.pace_index,
            prev_late_speed: prev.late_speed,
        })
    }
}

/// Histories indexed by horse registration number
#[derive(Debug, Default)]
pub struct HorseHistoryIndex {
    history: HashMap<String, HorseHistory>,
}

impl HorseHistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, horse_id: &str, result: PriorResult) {
        let next = self
            .history
            .get(horse_id)
            .map(|h| h.with_result(result.clone()))
            .unwrap_or_else(|| HorseHistory::from_results([result]));
        self.history.insert(horse_id.to_string(), next);
    }

    pub fn get(&self, horse_id: &str) -> Option<&HorseHistory> {
        self.history.get(horse_id)
    }

    pub fn horse_count(&self) -> usize {
        self.history.len()
    }

    pub fn total_races(&self) -> usize {
        self.history.values().map(HorseHistory::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race(date: &str, race_no: u8) -> RaceId {
        RaceId::parse(&format!("{}050101{:02}", date, race_no)).unwrap()
    }

    fn result(id: RaceId, rank: u8) -> PriorResult {
        PriorResult {
            race_id: id,
            rank: Some(rank),
            pace_index: Some(50.0 + rank as f64),
            late_speed: Some(34.0 + rank as f64 / 10.0),
        }
    }

    #[test]
    fn test_results_sorted_regardless_of_arrival() {
        let r1 = race("20260105", 1);
        let r2 = race("20260201", 1);
        let r3 = race("20260301", 1);
        let history = HorseHistory::from_results([result(r3, 3), result(r1, 1), result(r2, 2)]);

        let order: Vec<_> = history.results().iter().map(|r| r.race_id).collect();
        assert_eq!(order, vec![r1, r2, r3]);
    }

    #[test]
    fn test_resent_result_replaces() {
        let r1 = race("20260105", 1);
        let history = HorseHistory::from_results([result(r1, 5), result(r1, 2)]);
        assert_eq!(history.len(), 1);
        assert_eq!(history.results()[0].rank, Some(2));
    }

    #[test]
    fn test_with_result_leaves_original() {
        let r1 = race("20260105", 1);
        let empty = HorseHistory::default();
        let one = empty.with_result(result(r1, 1));
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_no_lag_without_prior_race() {
        let r1 = race("20260105", 1);
        let history = HorseHistory::from_results([result(r1, 1)]);
        // the only result is the race itself
        assert_eq!(history.lag_for(r1), None);
        // and a race before any recorded result
        assert_eq!(history.lag_for(race("20251201", 1)), None);
    }

    #[test]
    fn test_lag_is_previous_race() {
        let r1 = race("20260105", 1);
        let r2 = race("20260201", 1);
        let r3 = race("20260301", 1);
        let history = HorseHistory::from_results([result(r1, 4), result(r2, 7)]);

        let lag = history.lag_for(r3).unwrap();
        assert_eq!(lag.prev_rank, Some(7));
        assert!((lag.prev_pace_index.unwrap() - 57.0).abs() < 0.01);

        let lag = history.lag_for(r2).unwrap();
        assert_eq!(lag.prev_rank, Some(4));
    }

    #[test]
    fn test_prev_rank_never_leaks_own_result() {
        let races: Vec<RaceId> = (1..=9)
            .map(|m| race(&format!("2026{:02}01", m), 1))
            .collect();
        // distinct ranks so a leak would be visible
        let history = HorseHistory::from_results(
            races.iter().enumerate().map(|(i, id)| result(*id, i as u8 + 1)),
        );

        for (n, id) in races.iter().enumerate().skip(1) {
            let own_rank = history.results()[n].rank;
            let lag = history.lag_for(*id).unwrap();
            assert_ne!(lag.prev_rank, own_rank);
            assert_eq!(lag.prev_rank, history.results()[n - 1].rank);
        }
    }

    #[test]
    fn test_same_day_earlier_race_counts_as_prior() {
        let morning = race("20260301", 2);
        let afternoon = race("20260301", 11);
        let history = HorseHistory::from_results([result(morning, 1)]);
        assert_eq!(history.lag_for(afternoon).unwrap().prev_rank, Some(1));
    }

    #[test]
    fn test_index_record_and_lookup() {
        let mut index = HorseHistoryIndex::new();
        index.record("2019100001", result(race("20260105", 1), 2));
        index.record("2019100001", result(race("20260201", 1), 1));
        index.record("2019100002", result(race("20260105", 1), 5));

        assert_eq!(index.horse_count(), 2);
        assert_eq!(index.total_races(), 3);
        assert!(index.get("2019100002").is_some());
        assert_eq!(index.get("2019100001").unwrap().len(), 2);
        assert!(index.get("2019109999").is_none());
    }
}
