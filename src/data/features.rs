//! Feature Engineering
//!
//! Builds the model input for one entrant from its lag features and the
//! latest win-market quote.

use crate::models::{Entrant, OddsQuote};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Carried weight used when the card leaves the field blank
pub const DEFAULT_WEIGHT_KG: f64 = 55.0;

/// Why an entrant gets no prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// First recorded race for the horse
    NoPriorRace,
    /// Previous race exists but one of its measurements is missing
    MissingLagFeature,
    /// No current win quote (not yet on sale, or scratched)
    NoOdds,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPriorRace => write!(f, "no prior race"),
            SkipReason::MissingLagFeature => write!(f, "missing lag feature"),
            SkipReason::NoOdds => write!(f, "no odds"),
        }
    }
}

/// Model input for one entrant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub horse_number: u8,
    pub prev_pace_index: f64,
    pub prev_late_speed: f64,
    pub prev_rank: f64,
    pub popularity_rank: f64,
    pub win_odds: f64,
    pub field_size: f64,
    pub weight_kg: f64,
}

impl FeatureVector {
    /// Flat vector in model input order (see [`feature_names`])
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.prev_pace_index,
            self.prev_late_speed,
            self.prev_rank,
            self.popularity_rank,
            self.win_odds,
            self.field_size,
            self.horse_number as f64,
            self.weight_kg,
        ]
    }

    /// Odds per popularity rank; above 1.2 the crowd under-bets the horse
    pub fn odds_per_popularity(&self) -> f64 {
        self.win_odds / self.popularity_rank.max(1.0)
    }
}

pub fn feature_names() -> Vec<&'static str> {
    vec![
        "prev_pace_index",
        "prev_late_speed",
        "prev_rank",
        "popularity_rank",
        "win_odds",
        "field_size",
        "horse_number",
        "weight_kg",
    ]
}

/// Feature engineering for race entrants
pub struct FeatureEngineering;

impl FeatureEngineering {
    /// Build the feature vector, or say why this entrant must be skipped.
    ///
    /// Lag checks come before the odds check so a debut runner reports
    /// `NoPriorRace` even when it is quoted.
    pub fn create_features(
        entrant: &Entrant,
        quote: Option<&OddsQuote>,
        field_size: usize,
    ) -> Result<FeatureVector, SkipReason> {
        let lag = entrant.lag.ok_or(SkipReason::NoPriorRace)?;
        if !lag.is_complete() {
            return Err(SkipReason::MissingLagFeature);
        }
        let quote = quote.ok_or(SkipReason::NoOdds)?;

        Ok(FeatureVector {
            horse_number: entrant.horse_number,
            prev_pace_index: lag.prev_pace_index.unwrap_or_default(),
            prev_late_speed: lag.prev_late_speed.unwrap_or_default(),
            prev_rank: lag.prev_rank.unwrap_or_default() as f64,
            popularity_rank: quote.popularity_rank as f64,
            win_odds: quote.win_odds,
            field_size: field_size as f64,
            weight_kg: entrant.weight_kg.unwrap_or(DEFAULT_WEIGHT_KG),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LagFeatures, RaceId, Sex};

    fn entrant(lag: Option<LagFeatures>) -> Entrant {
        Entrant {
            race_id: RaceId::parse("2026020705010301").unwrap(),
            horse_number: 3,
            horse_id: "2019100003".to_string(),
            horse_name: "テスト".to_string(),
            bracket: Some(2),
            jockey: String::new(),
            trainer: String::new(),
            weight_kg: None,
            sex: Sex::Filly,
            coat_code: String::new(),
            age: Some(3),
            prior_results: Vec::new(),
            lag,
        }
    }

    fn quote() -> OddsQuote {
        OddsQuote {
            race_id: RaceId::parse("2026020705010301").unwrap(),
            horse_number: 3,
            win_odds: 12.5,
            popularity_rank: 5,
            announced_at: "02071130".to_string(),
        }
    }

    fn full_lag() -> LagFeatures {
        LagFeatures {
            prev_rank: Some(2),
            prev_pace_index: Some(51.0),
            prev_late_speed: Some(34.8),
        }
    }

    #[test]
    fn test_feature_order() {
        let fv = FeatureEngineering::create_features(&entrant(Some(full_lag())), Some(&quote()), 16)
            .unwrap();
        let v = fv.to_vec();
        assert_eq!(v.len(), feature_names().len());
        assert_eq!(v, vec![51.0, 34.8, 2.0, 5.0, 12.5, 16.0, 3.0, DEFAULT_WEIGHT_KG]);
    }

    #[test]
    fn test_skip_reasons() {
        let q = quote();
        assert_eq!(
            FeatureEngineering::create_features(&entrant(None), Some(&q), 16),
            Err(SkipReason::NoPriorRace)
        );

        let partial = LagFeatures {
            prev_late_speed: None,
            ..full_lag()
        };
        assert_eq!(
            FeatureEngineering::create_features(&entrant(Some(partial)), Some(&q), 16),
            Err(SkipReason::MissingLagFeature)
        );

        assert_eq!(
            FeatureEngineering::create_features(&entrant(Some(full_lag())), None, 16),
            Err(SkipReason::NoOdds)
        );
    }

    #[test]
    fn test_odds_per_popularity() {
        let fv = FeatureEngineering::create_features(&entrant(Some(full_lag())), Some(&quote()), 16)
            .unwrap();
        assert!((fv.odds_per_popularity() - 2.5).abs() < 0.01);
    }
}
