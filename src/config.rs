//! Engine configuration
//!
//! One JSON document with a `strategy` and a `bankroll` section. Every key
//! is optional; missing keys take the built-in defaults. The CLI layers
//! flag and environment overrides on top before calling [`EngineConfig::validate`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::bankroll::BankrollConfig;
use crate::core::kelly::SpearSizing;
use crate::core::synthesizer::StrategyConfig;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: StrategyConfig,
    pub bankroll: BankrollConfig,
    /// ONNX win model; the fallback estimator is used when absent
    pub model_path: Option<PathBuf>,
    pub feed_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.strategy;
        let b = &self.bankroll;

        if s.single_ev_threshold <= 0.0 || s.wide_ev_threshold <= 0.0 {
            return invalid("EV thresholds must be positive");
        }
        if s.wide_odds_factor <= 0.0 || s.wide_joint_factor <= 0.0 {
            return invalid("wide odds and joint factors must be positive");
        }
        if s.undervalued_ratio <= 0.0 {
            return invalid("undervalued_ratio must be positive");
        }
        if b.min_unit <= 0 {
            return invalid("min_unit must be positive");
        }
        if b.base_daily_cap < b.min_unit {
            return invalid("base_daily_cap must be at least one min_unit");
        }
        if !(b.throttle_multiplier > 0.0 && b.throttle_multiplier <= 1.0) {
            return invalid("throttle_multiplier must be in (0, 1]");
        }
        if b.loss_trigger_fraction < 0.0 {
            return invalid("loss_trigger_fraction must not be negative");
        }
        if s.base_stake < b.min_unit {
            return invalid("base_stake must be at least one min_unit");
        }
        if let SpearSizing::Kelly(k) = &s.spear_sizing {
            if !(0.0..=1.0).contains(&k.multiplier) || !(0.0..=1.0).contains(&k.max_stake_pct) {
                return invalid("kelly multiplier and max_stake_pct must be between 0.0 and 1.0");
            }
            if k.bankroll <= 0 {
                return invalid("kelly bankroll must be positive");
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.single_ev_threshold, 2.0);
        assert_eq!(config.bankroll.base_daily_cap, 10_000);
        assert!(config.model_path.is_none());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{"strategy": {"single_ev_threshold": 1.8}, "bankroll": {"base_daily_cap": 20000}}"#,
        )
        .unwrap();
        assert_eq!(config.strategy.single_ev_threshold, 1.8);
        assert_eq!(config.strategy.wide_ev_threshold, 1.34);
        assert_eq!(config.bankroll.base_daily_cap, 20_000);
        assert_eq!(config.bankroll.min_unit, 100);
    }

    #[test]
    fn test_kelly_sizing_from_json() {
        let config = EngineConfig::from_json(
            r#"{"strategy": {"spear_sizing": {"mode": "kelly", "bankroll": 50000, "multiplier": 0.5, "max_stake_pct": 0.05}}}"#,
        )
        .unwrap();
        match &config.strategy.spear_sizing {
            SpearSizing::Kelly(k) => {
                assert_eq!(k.bankroll, 50_000);
                assert!((k.multiplier - 0.5).abs() < 0.01);
            }
            SpearSizing::Flat => panic!("expected kelly sizing"),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_nonsense() {
        let mut config = EngineConfig::default();
        config.bankroll.throttle_multiplier = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.bankroll.base_daily_cap = 50;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.strategy.base_stake = 150;
        config.bankroll.min_unit = 200;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.strategy.single_ev_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/keiba.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
