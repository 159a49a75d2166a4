//! Bet Synthesizer
//!
//! Pure function from a race's predictions to candidate bets.
//!
//! - Spear: WIN on every entrant with `ev >= single_ev_threshold`.
//! - Shield: WIDE pairs of the most probable entrant (anchor) with the next
//!   few by probability, using a synthetic pair odds and a joint
//!   probability heuristic, gated by an undervalued-by-the-crowd filter.
//!
//! Every bet carries a rationale tag with the exact comparison that fired.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::kelly::SpearSizing;
use crate::models::{Bet, BetType, Prediction, Selection};

/// Strategy thresholds and heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub single_ev_threshold: f64,
    pub wide_ev_threshold: f64,
    /// Scales the geometric mean of the two win odds into pair odds
    pub wide_odds_factor: f64,
    /// Approximate finishing-order permutations a Wide ticket covers
    pub wide_joint_factor: f64,
    /// Partners considered after the anchor
    pub wide_partners: usize,
    pub undervalued_ratio: f64,
    pub base_stake: i64,
    pub spear_sizing: SpearSizing,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            single_ev_threshold: 2.0,
            wide_ev_threshold: 1.34,
            wide_odds_factor: 0.75,
            wide_joint_factor: 5.0,
            wide_partners: 4,
            undervalued_ratio: 1.2,
            base_stake: 100,
            spear_sizing: SpearSizing::Flat,
        }
    }
}

/// Turns predictions into candidate bets
#[derive(Debug, Clone, Default)]
pub struct BetSynthesizer {
    config: StrategyConfig,
}

impl BetSynthesizer {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Candidate bets, race by race: Spear by horse number, then Shield by partner rank
    pub fn synthesize(&self, predictions: &[Prediction]) -> Vec<Bet> {
        let mut by_race: BTreeMap<_, Vec<&Prediction>> = BTreeMap::new();
        for p in predictions {
            by_race.entry(p.race_id).or_default().push(p);
        }

        by_race
            .into_values()
            .flat_map(|race| {
                let mut bets = self.spear(&race);
                bets.extend(self.shield(&race));
                bets
            })
            .collect()
    }

    fn spear(&self, race: &[&Prediction]) -> Vec<Bet> {
        let cfg = &self.config;
        let mut picks: Vec<&Prediction> = race
            .iter()
            .copied()
            .filter(|p| p.ev >= cfg.single_ev_threshold)
            .collect();
        picks.sort_by_key(|p| p.horse_number);

        picks
            .into_iter()
            .map(|p| Bet {
                race_id: p.race_id,
                selection: Selection::Single(p.horse_number),
                bet_type: BetType::Win,
                stake_amount: cfg
                    .spear_sizing
                    .stake(p.win_probability, p.win_odds, cfg.base_stake),
                rationale_tag: format!(
                    "SPEAR ev={:.3}>={:.2} p={:.3} odds={:.1}",
                    p.ev, cfg.single_ev_threshold, p.win_probability, p.win_odds
                ),
            })
            .collect()
    }

    fn shield(&self, race: &[&Prediction]) -> Vec<Bet> {
        let cfg = &self.config;
        let mut ranked: Vec<&Prediction> = race.to_vec();
        ranked.sort_by(|a, b| {
            b.win_probability
                .partial_cmp(&a.win_probability)
                .unwrap_or(Ordering::Equal)
                .then(a.horse_number.cmp(&b.horse_number))
        });

        let Some((anchor, rest)) = ranked.split_first() else {
            return Vec::new();
        };

        rest.iter()
            .take(cfg.wide_partners)
            .filter_map(|partner| {
                let synthetic_odds = (anchor.win_odds * partner.win_odds).sqrt() * cfg.wide_odds_factor;
                let joint_prob = anchor.win_probability * partner.win_probability * cfg.wide_joint_factor;
                let ev = joint_prob * synthetic_odds;
                if ev < cfg.wide_ev_threshold {
                    return None;
                }

                let undervalued = [("anchor", anchor), ("partner", partner)]
                    .into_iter()
                    .map(|(role, p)| (role, p.odds_per_popularity()))
                    .find(|(_, ratio)| *ratio > cfg.undervalued_ratio)?;

                Some(Bet {
                    race_id: anchor.race_id,
                    selection: Selection::Pair(anchor.horse_number, partner.horse_number),
                    bet_type: BetType::Wide,
                    stake_amount: cfg.base_stake,
                    rationale_tag: format!(
                        "SHIELD ev={:.3}>={:.2} syn_odds={:.1} uv={}({:.2}>{:.2})",
                        ev,
                        cfg.wide_ev_threshold,
                        synthetic_odds,
                        undervalued.0,
                        undervalued.1,
                        cfg.undervalued_ratio
                    ),
                })
            })
            .collect()
    }
}
