use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tier thresholds must be finite with 0 < low_cut <= high_cut (got [{low_cut}, {high_cut}])")]
    InvalidThresholds { low_cut: f64, high_cut: f64 },
    #[error("trend rule '{name}' must be finite and non-negative (got {value})")]
    InvalidTrendRule { name: &'static str, value: f64 },
}

/// How the batch reference spread is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadEstimator {
    /// Median centre, scaled median absolute deviation.
    #[default]
    Robust,
    /// Mean centre, population standard deviation.
    Standard,
}

/// `[low_cut, high_cut]` over the anomaly score.
///
/// Scores below `low_cut` are Low, scores in `[low_cut, high_cut)` Medium and
/// scores at or above `high_cut` High.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct TierThresholds {
    pub low_cut: f64,
    pub high_cut: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            low_cut: 1.5,
            high_cut: 3.0,
        }
    }
}

impl From<[f64; 2]> for TierThresholds {
    fn from([low_cut, high_cut]: [f64; 2]) -> Self {
        Self { low_cut, high_cut }
    }
}

impl From<TierThresholds> for [f64; 2] {
    fn from(t: TierThresholds) -> Self {
        [t.low_cut, t.high_cut]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub spread_estimator: SpreadEstimator,
    pub tier_thresholds: TierThresholds,
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let TierThresholds { low_cut, high_cut } = self.tier_thresholds;
        let ok = low_cut.is_finite() && high_cut.is_finite() && low_cut > 0.0 && low_cut <= high_cut;
        if !ok {
            return Err(ConfigError::InvalidThresholds { low_cut, high_cut });
        }
        Ok(())
    }
}

/// Month-over-month rule thresholds. Percentages are magnitudes, so a
/// `units_drop_pct` of 40 fires on a change of -40 % or worse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendRules {
    pub peak_load_drop_pct: f64,
    pub units_drop_pct: f64,
    /// Current units below this are extremely low.
    pub min_units: f64,
    /// Current units above this with a peak load under `min_peak_load_kw` are inconsistent.
    pub high_units: f64,
    pub min_peak_load_kw: f64,
    pub combined_drop_pct: f64,
}

impl Default for TrendRules {
    fn default() -> Self {
        Self {
            peak_load_drop_pct: 40.0,
            units_drop_pct: 40.0,
            min_units: 50.0,
            high_units: 200.0,
            min_peak_load_kw: 1.0,
            combined_drop_pct: 25.0,
        }
    }
}

impl TrendRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = [
            ("peak_load_drop_pct", self.peak_load_drop_pct),
            ("units_drop_pct", self.units_drop_pct),
            ("min_units", self.min_units),
            ("high_units", self.high_units),
            ("min_peak_load_kw", self.min_peak_load_kw),
            ("combined_drop_pct", self.combined_drop_pct),
        ];
        for (name, value) in rules {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidTrendRule { name, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scorer_config_is_valid() {
        assert!(ScorerConfig::default().validate().is_ok());
        assert!(TrendRules::default().validate().is_ok());
    }

    #[test]
    fn thresholds_deserialize_from_pair() {
        let cfg: ScorerConfig = serde_json::from_str(
            r#"{"spread_estimator": "standard", "tier_thresholds": [1.0, 2.0]}"#,
        )
        .unwrap();
        assert_eq!(cfg.spread_estimator, SpreadEstimator::Standard);
        assert_eq!(cfg.tier_thresholds.low_cut, 1.0);
        assert_eq!(cfg.tier_thresholds.high_cut, 2.0);
    }

    #[test]
    fn rejects_inverted_or_zero_thresholds() {
        let inverted = ScorerConfig {
            tier_thresholds: TierThresholds::from([3.0, 1.0]),
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(ConfigError::InvalidThresholds { .. })));

        let zero = ScorerConfig {
            tier_thresholds: TierThresholds::from([0.0, 1.0]),
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn rejects_negative_trend_rule() {
        let rules = TrendRules {
            min_units: -1.0,
            ..Default::default()
        };
        assert_eq!(
            rules.validate(),
            Err(ConfigError::InvalidTrendRule {
                name: "min_units",
                value: -1.0
            })
        );
    }
}
