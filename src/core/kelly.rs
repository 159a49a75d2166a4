//! Kelly Criterion Stake Sizing
//!
//! Optional sizing for Spear (single WIN) bets.
//!
//! The Kelly criterion formula:
//!     f* = (b*p - q) / b = (p*odds - 1) / (odds - 1)
//!
//! Where:
//!     f* = fraction of bankroll to bet
//!     b = odds - 1 (net odds)
//!     p = probability of winning
//!     q = 1 - p (probability of losing)
//!     odds = decimal win odds (e.g., 5.0 pays 500 yen per 100)

use serde::{Deserialize, Serialize};

/// Stakes are bought in 100-yen units
pub const STAKE_UNIT: i64 = 100;

/// Calculate Kelly fraction for a single bet
///
/// Negative when EV < 1.
///
/// # Examples
/// ```
/// use keiba::core::kelly::calculate_kelly_fraction;
/// let kelly = calculate_kelly_fraction(0.25, 5.0); // EV = 1.25
/// assert!((kelly - 0.0625).abs() < 0.0001);
/// ```
pub fn calculate_kelly_fraction(probability: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return 0.0;
    }

    // f* = (p * odds - 1) / (odds - 1)
    (probability * odds - 1.0) / (odds - 1.0)
}

/// Fractional Kelly applied to a reference bankroll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KellySizing {
    pub bankroll: i64,
    /// Fraction of full Kelly (0.25 = quarter Kelly)
    pub multiplier: f64,
    /// Largest single stake as a fraction of bankroll
    pub max_stake_pct: f64,
}

impl Default for KellySizing {
    fn default() -> Self {
        Self {
            bankroll: 100_000,
            multiplier: 0.25,
            max_stake_pct: 0.10,
        }
    }
}

impl KellySizing {
    /// Stake rounded down to 100-yen units, never below `floor`
    pub fn stake(&self, probability: f64, odds: f64, floor: i64) -> i64 {
        let kelly = calculate_kelly_fraction(probability, odds);
        if kelly <= 0.0 {
            return floor;
        }

        let bankroll = self.bankroll as f64;
        let stake = (bankroll * kelly * self.multiplier).min(bankroll * self.max_stake_pct) as i64;

        ((stake / STAKE_UNIT) * STAKE_UNIT).max(floor)
    }
}

/// How Spear bets are staked before the bankroll controller sees them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpearSizing {
    /// Always the configured base stake
    #[default]
    Flat,
    Kelly(KellySizing),
}

impl SpearSizing {
    pub fn stake(&self, probability: f64, odds: f64, base_stake: i64) -> i64 {
        match self {
            SpearSizing::Flat => base_stake,
            SpearSizing::Kelly(kelly) => kelly.stake(probability, odds, base_stake),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kelly_fraction_positive_ev() {
        // EV = 0.25 * 5.0 = 1.25 (positive edge)
        let kelly = calculate_kelly_fraction(0.25, 5.0);
        assert!((kelly - 0.0625).abs() < 0.0001);
    }

    #[test]
    fn test_kelly_fraction_negative_ev() {
        let kelly = calculate_kelly_fraction(0.10, 5.0);
        assert!(kelly < 0.0);
    }

    #[test]
    fn test_kelly_fraction_even_odds() {
        assert_eq!(calculate_kelly_fraction(0.25, 1.0), 0.0);
    }

    #[test]
    fn test_kelly_stake_rounded_and_capped() {
        let sizing = KellySizing::default();
        // Kelly = (0.45*5 - 1)/4 = 0.3125, quarter = 0.078, 7812 -> 7800
        assert_eq!(sizing.stake(0.45, 5.0, 100), 7_800);
        // Kelly = (0.9*3 - 1)/2 = 0.85, quarter = 0.2125 -> capped at 10%
        assert_eq!(sizing.stake(0.9, 3.0, 100), 10_000);
    }

    #[test]
    fn test_kelly_stake_never_below_floor() {
        let sizing = KellySizing {
            bankroll: 1_000,
            ..Default::default()
        };
        assert_eq!(sizing.stake(0.45, 5.0, 100), 100);
        assert_eq!(sizing.stake(0.05, 5.0, 200), 200);
    }

    #[test]
    fn test_spear_sizing_modes() {
        assert_eq!(SpearSizing::Flat.stake(0.45, 5.0, 300), 300);
        let kelly = SpearSizing::Kelly(KellySizing::default());
        assert_eq!(kelly.stake(0.45, 5.0, 300), 7_800);
    }

    #[test]
    fn test_spear_sizing_serde_shape() {
        let json = serde_json::to_string(&SpearSizing::Flat).unwrap();
        assert_eq!(json, r#"{"mode":"flat"}"#);
        let back: SpearSizing =
            serde_json::from_str(r#"{"mode":"kelly","bankroll":50000,"multiplier":0.5,"max_stake_pct":0.1}"#)
                .unwrap();
        assert_eq!(
            back,
            SpearSizing::Kelly(KellySizing {
                bankroll: 50_000,
                multiplier: 0.5,
                max_stake_pct: 0.1
            })
        );
    }
}
