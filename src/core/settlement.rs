//! Bet settlement against payout tables
//!
//! Payout tables are per 100 yen staked. A race without a payout record
//! leaves its bets unsettled rather than lost.

use serde::Serialize;

use crate::models::{Bet, BetType, RaceOutcome, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Settlement {
    Won { payout_per_100: i64 },
    Lost,
    Unsettled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettledBet {
    pub bet: Bet,
    pub settlement: Settlement,
    pub returned: i64,
}

impl SettledBet {
    pub fn is_hit(&self) -> bool {
        matches!(self.settlement, Settlement::Won { .. })
    }

    pub fn profit(&self) -> i64 {
        match self.settlement {
            Settlement::Unsettled => 0,
            _ => self.returned - self.bet.stake_amount,
        }
    }
}

/// Grade one bet; `outcome` is the race's outcome if any record arrived
pub fn settle_bet(bet: &Bet, outcome: Option<&RaceOutcome>) -> SettledBet {
    let settlement = match outcome.filter(|o| o.has_payouts()) {
        None => Settlement::Unsettled,
        Some(outcome) => {
            let payout = match (bet.bet_type, bet.selection) {
                (BetType::Win, Selection::Single(h)) => outcome.win.get(&h).copied(),
                (BetType::Wide, Selection::Pair(a, b)) => outcome.wide_payout(a, b),
                _ => None,
            };
            match payout {
                Some(payout_per_100) => Settlement::Won { payout_per_100 },
                None => Settlement::Lost,
            }
        }
    };

    let returned = match settlement {
        Settlement::Won { payout_per_100 } => payout_per_100 * bet.stake_amount / 100,
        _ => 0,
    };

    SettledBet {
        bet: bet.clone(),
        settlement,
        returned,
    }
}

pub fn total_returned(settled: &[SettledBet]) -> i64 {
    settled.iter().map(|s| s.returned).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RaceId;

    fn bet(bet_type: BetType, selection: Selection, stake: i64) -> Bet {
        Bet {
            race_id: RaceId::parse("2026020705010311").unwrap(),
            selection,
            bet_type,
            stake_amount: stake,
            rationale_tag: String::new(),
        }
    }

    fn outcome() -> RaceOutcome {
        let mut o = RaceOutcome::default();
        o.ranks.insert(9, 1);
        o.win.insert(9, 520);
        o.place.insert(9, 190);
        o.wide.insert((3, 9), 1_240);
        o
    }

    #[test]
    fn test_win_hit_pays_per_100() {
        let s = settle_bet(&bet(BetType::Win, Selection::Single(9), 300), Some(&outcome()));
        assert_eq!(s.settlement, Settlement::Won { payout_per_100: 520 });
        assert_eq!(s.returned, 1_560);
        assert_eq!(s.profit(), 1_260);
        assert!(s.is_hit());
    }

    #[test]
    fn test_win_miss() {
        let s = settle_bet(&bet(BetType::Win, Selection::Single(3), 100), Some(&outcome()));
        assert_eq!(s.settlement, Settlement::Lost);
        assert_eq!(s.profit(), -100);
    }

    #[test]
    fn test_wide_pair_is_unordered() {
        let s = settle_bet(&bet(BetType::Wide, Selection::Pair(9, 3), 100), Some(&outcome()));
        assert_eq!(s.returned, 1_240);
        let s = settle_bet(&bet(BetType::Wide, Selection::Pair(9, 4), 100), Some(&outcome()));
        assert_eq!(s.settlement, Settlement::Lost);
    }

    #[test]
    fn test_no_payout_record_is_unsettled() {
        let b = bet(BetType::Win, Selection::Single(9), 100);
        assert_eq!(settle_bet(&b, None).settlement, Settlement::Unsettled);

        // ranks alone are not enough to grade a bet
        let mut ranks_only = RaceOutcome::default();
        ranks_only.ranks.insert(9, 1);
        let s = settle_bet(&b, Some(&ranks_only));
        assert_eq!(s.settlement, Settlement::Unsettled);
        assert_eq!(s.profit(), 0);
    }

    #[test]
    fn test_total_returned() {
        let o = outcome();
        let settled = vec![
            settle_bet(&bet(BetType::Win, Selection::Single(9), 100), Some(&o)),
            settle_bet(&bet(BetType::Wide, Selection::Pair(3, 9), 200), Some(&o)),
            settle_bet(&bet(BetType::Win, Selection::Single(1), 100), Some(&o)),
        ];
        assert_eq!(total_returned(&settled), 520 + 2_480);
    }
}
