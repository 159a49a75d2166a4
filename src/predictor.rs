//! Win probability and EV estimation
//!
//! A [`WinModel`] scores one entrant's feature vector. The [`Estimator`]
//! wraps an optional model with the odds-based [`FallbackModel`]: any model
//! error or out-of-range score degrades to the fallback for that entrant
//! only, and entrants without lag features or a quote are skipped.

use serde::Serialize;
use tracing::{debug, warn};

use crate::data::assembler::RaceSnapshot;
use crate::data::features::{FeatureEngineering, FeatureVector, SkipReason};
use crate::error::{validate_probability, ModelError};
use crate::models::{Entrant, OddsQuote, Prediction, ProbabilitySource};

#[cfg(feature = "onnx")]
pub use onnx::OnnxWinModel;

/// Any classifier returning a win probability in [0, 1]
pub trait WinModel: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;
}

/// Odds-only probability rule used when no model is configured or it fails.
///
/// Starts from the implied probability `1 / odds` and tilts it by how the
/// odds compare with the popularity rank.
#[derive(Debug, Clone)]
pub struct FallbackModel {
    /// Odds per popularity rank above which the crowd is under-betting
    pub undervalued_ratio: f64,
    pub undervalued_tilt: f64,
    /// Odds below which a runner counts as an over-bet favourite
    pub favourite_odds: f64,
    pub favourite_tilt: f64,
}

impl Default for FallbackModel {
    fn default() -> Self {
        Self {
            undervalued_ratio: 1.2,
            undervalued_tilt: 1.15,
            favourite_odds: 5.0,
            favourite_tilt: 0.85,
        }
    }
}

impl FallbackModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implied probability `1 / odds`, tilted by the odds/popularity gate.
    ///
    /// A horse whose odds run well past its popularity rank is treated as
    /// undervalued and nudged up; short-priced favourites are shaded down.
    /// The gate is used instead of a flat longshot boost (odds above 50
    /// times 1.15): long odds earn the tilt only through the odds to
    /// popularity ratio.
    pub fn probability(&self, win_odds: f64, popularity_rank: f64) -> f64 {
        if !win_odds.is_finite() || win_odds <= 0.0 {
            return 0.0;
        }

        let implied = 1.0 / win_odds;
        let ratio = win_odds / popularity_rank.max(1.0);
        let tilt = if ratio > self.undervalued_ratio {
            self.undervalued_tilt
        } else if win_odds < self.favourite_odds {
            self.favourite_tilt
        } else {
            1.0
        };

        (implied * tilt).clamp(0.0, 1.0)
    }
}

impl WinModel for FallbackModel {
    fn name(&self) -> &str {
        "fallback"
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        Ok(self.probability(features.win_odds, features.popularity_rank))
    }
}

/// Outcome of estimating one entrant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Estimate {
    Predicted(Prediction),
    Skipped { horse_number: u8, reason: SkipReason },
}

impl Estimate {
    pub fn prediction(&self) -> Option<&Prediction> {
        match self {
            Estimate::Predicted(p) => Some(p),
            Estimate::Skipped { .. } => None,
        }
    }
}

/// Probability/EV estimator
pub struct Estimator {
    model: Option<Box<dyn WinModel>>,
    fallback: FallbackModel,
}

impl Default for Estimator {
    fn default() -> Self {
        Self::fallback_only()
    }
}

impl Estimator {
    pub fn new(model: Option<Box<dyn WinModel>>) -> Self {
        Self {
            model,
            fallback: FallbackModel::new(),
        }
    }

    pub fn with_model<M: WinModel + 'static>(model: M) -> Self {
        Self::new(Some(Box::new(model)))
    }

    pub fn fallback_only() -> Self {
        Self::new(None)
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_ref()
            .map(|m| m.name())
            .unwrap_or_else(|| self.fallback.name())
    }

    /// Estimate one entrant against its latest quote
    pub fn estimate(
        &self,
        entrant: &Entrant,
        odds: Option<&OddsQuote>,
        field_size: usize,
    ) -> Estimate {
        let features = match FeatureEngineering::create_features(entrant, odds, field_size) {
            Ok(features) => features,
            Err(reason) => {
                debug!(
                    race_id = %entrant.race_id,
                    horse_number = entrant.horse_number,
                    "skipped: {}",
                    reason
                );
                return Estimate::Skipped {
                    horse_number: entrant.horse_number,
                    reason,
                };
            }
        };

        let (win_probability, source) = self.score(entrant, &features);

        Estimate::Predicted(Prediction {
            race_id: entrant.race_id,
            horse_number: entrant.horse_number,
            win_probability,
            ev: win_probability * features.win_odds,
            win_odds: features.win_odds,
            popularity_rank: features.popularity_rank as u8,
            source,
        })
    }

    fn score(&self, entrant: &Entrant, features: &FeatureVector) -> (f64, ProbabilitySource) {
        if let Some(model) = &self.model {
            match model
                .predict(features)
                .and_then(|p| validate_probability(p).map(|_| p))
            {
                Ok(p) => return (p, ProbabilitySource::Model),
                Err(e) => warn!(
                    race_id = %entrant.race_id,
                    horse_number = entrant.horse_number,
                    "{} model failed, using fallback: {}",
                    model.name(),
                    e
                ),
            }
        }

        let p = self
            .fallback
            .probability(features.win_odds, features.popularity_rank);
        (p, ProbabilitySource::Fallback)
    }

    /// Estimate every entrant of a race snapshot, in horse-number order
    pub fn estimate_race(&self, snapshot: &RaceSnapshot) -> Vec<Estimate> {
        let field_size = snapshot.field_size();
        snapshot
            .entrants
            .iter()
            .map(|e| self.estimate(e, snapshot.quote_for(e.horse_number), field_size))
            .collect()
    }
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::WinModel;
    use crate::data::features::{feature_names, FeatureVector};
    use crate::error::ModelError;
    use ort::{
        session::{builder::GraphOptimizationLevel, Session},
        value::Tensor,
    };
    use std::path::Path;
    use std::sync::Mutex;
    use tracing::info;

    /// Single-input binary classifier exported to ONNX.
    ///
    /// The last column of the first output is taken as the win probability.
    pub struct OnnxWinModel {
        session: Mutex<Session>,
    }

    fn inference(e: impl std::fmt::Display) -> ModelError {
        ModelError::Inference(e.to_string())
    }

    fn open_session(model_path: &Path) -> Result<Session, Box<dyn std::error::Error>> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)?;
        Ok(session)
    }

    impl OnnxWinModel {
        pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self, ModelError> {
            let model_path = model_path.as_ref();
            info!("Loading model: {:?}", model_path);

            let session = open_session(model_path)
                .map_err(|e| ModelError::Load(format!("{:?}: {}", model_path, e)))?;

            Ok(Self {
                session: Mutex::new(session),
            })
        }
    }

    impl WinModel for OnnxWinModel {
        fn name(&self) -> &str {
            "onnx"
        }

        fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
            let input: Vec<f32> = features.to_vec().iter().map(|&x| x as f32).collect();
            let tensor =
                Tensor::from_array(([1usize, feature_names().len()], input)).map_err(inference)?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| ModelError::Inference("session lock poisoned".to_string()))?;
            let outputs = session.run(ort::inputs![tensor]).map_err(inference)?;
            let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;

            data.last()
                .map(|&p| p as f64)
                .ok_or_else(|| ModelError::Inference("empty model output".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LagFeatures, RaceId, Sex};
    use approx::assert_relative_eq;

    struct StubModel(f64);

    impl WinModel for StubModel {
        fn name(&self) -> &str {
            "stub"
        }

        fn predict(&self, _features: &FeatureVector) -> Result<f64, ModelError> {
            Ok(self.0)
        }
    }

    struct BrokenModel;

    impl WinModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }

        fn predict(&self, _features: &FeatureVector) -> Result<f64, ModelError> {
            Err(ModelError::Inference("shape mismatch".to_string()))
        }
    }

    fn race_id() -> RaceId {
        RaceId::parse("2026020705010311").unwrap()
    }

    fn entrant(horse_number: u8, lag: Option<LagFeatures>) -> Entrant {
        Entrant {
            race_id: race_id(),
            horse_number,
            horse_id: format!("20191000{:02}", horse_number),
            horse_name: String::new(),
            bracket: None,
            jockey: String::new(),
            trainer: String::new(),
            weight_kg: Some(56.0),
            sex: Sex::Colt,
            coat_code: String::new(),
            age: Some(4),
            prior_results: Vec::new(),
            lag,
        }
    }

    fn lag() -> Option<LagFeatures> {
        Some(LagFeatures {
            prev_rank: Some(3),
            prev_pace_index: Some(50.5),
            prev_late_speed: Some(35.1),
        })
    }

    fn quote(horse_number: u8, win_odds: f64, popularity_rank: u8) -> OddsQuote {
        OddsQuote {
            race_id: race_id(),
            horse_number,
            win_odds,
            popularity_rank,
            announced_at: "02071500".to_string(),
        }
    }

    #[test]
    fn test_fallback_probability() {
        let fb = FallbackModel::new();
        // favourite, ratio 2.0/1 > 1.2 so the undervalued tilt wins
        assert_relative_eq!(fb.probability(2.0, 1.0), 0.575, epsilon = 1e-9);
        // short odds but ranked low enough to not be undervalued
        assert_relative_eq!(fb.probability(4.0, 4.0), 0.2125, epsilon = 1e-9);
        // neutral
        assert_relative_eq!(fb.probability(10.0, 9.0), 0.1, epsilon = 1e-9);
        // long odds alone earn nothing
        assert_relative_eq!(fb.probability(60.0, 55.0), 1.0 / 60.0, epsilon = 1e-9);
        assert_eq!(fb.probability(0.0, 1.0), 0.0);
        assert!(fb.probability(1.0, 1.0) <= 1.0);
    }

    #[test]
    fn test_no_prior_race_is_skipped() {
        let est = Estimator::with_model(StubModel(0.9));
        let result = est.estimate(&entrant(4, None), Some(&quote(4, 3.0, 1)), 16);
        assert_eq!(
            result,
            Estimate::Skipped {
                horse_number: 4,
                reason: SkipReason::NoPriorRace
            }
        );
    }

    #[test]
    fn test_missing_odds_is_skipped() {
        let est = Estimator::fallback_only();
        let result = est.estimate(&entrant(4, lag()), None, 16);
        assert!(matches!(
            result,
            Estimate::Skipped {
                reason: SkipReason::NoOdds,
                ..
            }
        ));
    }

    #[test]
    fn test_ev_is_probability_times_odds() {
        let est = Estimator::with_model(StubModel(0.45));
        let result = est.estimate(&entrant(9, lag()), Some(&quote(9, 5.0, 5)), 16);
        let p = result.prediction().unwrap();
        assert_eq!(p.source, ProbabilitySource::Model);
        assert_relative_eq!(p.ev, 2.25, epsilon = 1e-9);
        assert_eq!(p.popularity_rank, 5);
    }

    #[test]
    fn test_model_error_falls_back() {
        let est = Estimator::with_model(BrokenModel);
        let result = est.estimate(&entrant(2, lag()), Some(&quote(2, 10.0, 9)), 16);
        let p = result.prediction().unwrap();
        assert_eq!(p.source, ProbabilitySource::Fallback);
        assert!((p.win_probability - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_score_falls_back() {
        for bad in [1.4, -0.2, f64::NAN] {
            let est = Estimator::with_model(StubModel(bad));
            let result = est.estimate(&entrant(2, lag()), Some(&quote(2, 10.0, 9)), 16);
            let p = result.prediction().unwrap();
            assert_eq!(p.source, ProbabilitySource::Fallback);
            assert!((0.0..=1.0).contains(&p.win_probability));
        }
    }

    #[test]
    fn test_model_name() {
        assert_eq!(Estimator::fallback_only().model_name(), "fallback");
        assert_eq!(Estimator::with_model(StubModel(0.1)).model_name(), "stub");
    }
}
