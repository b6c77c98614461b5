use std::{collections::HashSet, fmt};

use serde::{Deserialize, Serialize};

use super::config::{ScorerConfig, SpreadEstimator, TierThresholds};
use crate::domain::{Period, RiskTier, ScoreResult, UsageRecord};

/// Score assigned to every record when a batch holds fewer than two valid
/// records and no reference spread can be estimated.
pub const UNDERDETERMINED_SCORE: f64 = 0.0;

/// Scales the median absolute deviation to a normal standard deviation.
const MAD_SCALE: f64 = 1.4826;
/// Scales the mean absolute deviation to a normal standard deviation. Used when
/// more than half the batch sits exactly on the median.
const MEAN_AD_SCALE: f64 = 1.2533;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    MissingCustomerId,
    NegativeConsumption,
    NonFiniteConsumption,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::MissingCustomerId => "customer_id is missing",
            Self::NegativeConsumption => "consumption must be non-negative",
            Self::NonFiniteConsumption => "consumption must be a finite number",
        };
        f.write_str(msg)
    }
}

/// A row excluded from scoring. Never aborts the batch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("invalid record at index {index}: {reason}")]
pub struct InvalidRecord {
    /// Position of the record in the scored slice.
    pub index: usize,
    pub customer_id: Option<String>,
    pub reason: InvalidReason,
}

/// Batch-level failures. No results are produced when one of these is returned.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringError {
    #[error("duplicate record for customer '{customer_id}' in period {period}")]
    DuplicateRecord { customer_id: String, period: Period },
    #[error("batch contains no valid records")]
    EmptyBatch,
}

/// The reference distribution a batch was scored against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub estimator: SpreadEstimator,
    pub centre: f64,
    /// Zero when every valid consumption is identical or fewer than two
    /// records are valid.
    pub spread: f64,
    pub valid_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredBatch {
    /// Ranked by `anomaly_score` descending, then `customer_id` ascending.
    pub results: Vec<ScoreResult>,
    pub invalid: Vec<InvalidRecord>,
    pub reference: ReferenceStats,
}

impl ScoredBatch {
    pub fn count_tier(&self, tier: RiskTier) -> usize {
        self.results.iter().filter(|r| r.risk_tier == tier).count()
    }
}

/// Row-level validation applied before scoring.
pub fn validate_record(index: usize, record: &UsageRecord) -> Result<(), InvalidRecord> {
    let id = record.customer_id.trim();
    let reason = if id.is_empty() {
        Some(InvalidReason::MissingCustomerId)
    } else if !record.consumption.is_finite() {
        Some(InvalidReason::NonFiniteConsumption)
    } else if record.consumption < 0.0 {
        Some(InvalidReason::NegativeConsumption)
    } else {
        None
    };

    match reason {
        None => Ok(()),
        Some(reason) => Err(InvalidRecord {
            index,
            customer_id: (!id.is_empty()).then(|| id.to_string()),
            reason,
        }),
    }
}

/// Score one reporting period's worth of usage records.
///
/// Every record is measured against the batch's own consumption distribution;
/// the deviation in spread units becomes the anomaly score, and the configured
/// thresholds map it to a risk tier.
pub fn score_batch(records: &[UsageRecord], config: &ScorerConfig) -> Result<ScoredBatch, ScoringError> {
    check_duplicates(records.iter().map(|r| (r.customer_id.as_str(), r.period)))?;

    let mut valid = Vec::with_capacity(records.len());
    let mut invalid = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match validate_record(index, record) {
            Ok(()) => valid.push(record),
            Err(e) => invalid.push(e),
        }
    }

    if valid.is_empty() {
        return Err(ScoringError::EmptyBatch);
    }

    let values: Vec<f64> = valid.iter().map(|r| r.consumption).collect();
    let reference = reference_stats(&values, config.spread_estimator);
    let degenerate = reference.valid_records < 2 || reference.spread <= 0.0;

    let mut results: Vec<ScoreResult> = valid
        .into_iter()
        .map(|record| {
            let (deviation, anomaly_score, risk_tier) = if reference.valid_records < 2 {
                (0.0, UNDERDETERMINED_SCORE, RiskTier::Low)
            } else if degenerate {
                (0.0, 0.0, RiskTier::Low)
            } else {
                let deviation = (record.consumption - reference.centre) / reference.spread;
                let score = deviation.abs();
                (deviation, score, classify(score, &config.tier_thresholds))
            };

            ScoreResult {
                customer_id: record.customer_id.trim().to_string(),
                period: record.period,
                consumption: record.consumption,
                deviation,
                anomaly_score,
                risk_tier,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.anomaly_score
            .total_cmp(&a.anomaly_score)
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });

    Ok(ScoredBatch {
        results,
        invalid,
        reference,
    })
}

/// Fails on the first customer id seen twice. Blank ids are ignored; whether
/// a row is otherwise valid does not matter.
pub fn check_duplicates<'a, I>(rows: I) -> Result<(), ScoringError>
where
    I: IntoIterator<Item = (&'a str, Period)>,
{
    let mut seen = HashSet::new();
    for (customer_id, period) in rows {
        let id = customer_id.trim();
        if !id.is_empty() && !seen.insert(id) {
            return Err(ScoringError::DuplicateRecord {
                customer_id: id.to_string(),
                period,
            });
        }
    }
    Ok(())
}

fn classify(score: f64, thresholds: &TierThresholds) -> RiskTier {
    if score >= thresholds.high_cut {
        RiskTier::High
    } else if score >= thresholds.low_cut {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

fn reference_stats(values: &[f64], estimator: SpreadEstimator) -> ReferenceStats {
    let (centre, spread) = match values {
        [] => (0.0, 0.0),
        [first, rest @ ..] if rest.iter().all(|v| v == first) => (*first, 0.0),
        _ => match estimator {
            SpreadEstimator::Standard => {
                let mean = mean(values);
                // Squares are taken on deviations scaled into [0, 1] so they cannot overflow.
                let scale = values.iter().fold(0.0_f64, |m, v| m.max((v - mean).abs()));
                let variance =
                    values.iter().map(|v| ((v - mean) / scale).powi(2)).sum::<f64>() / values.len() as f64;
                (mean, scale * variance.sqrt())
            }
            SpreadEstimator::Robust => {
                let median = median(values);
                let abs_dev: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
                let mad = median_of(abs_dev.clone());
                let spread = if mad > 0.0 {
                    mad * MAD_SCALE
                } else {
                    mean(&abs_dev) * MEAN_AD_SCALE
                };
                (median, spread)
            }
        },
    };

    ReferenceStats {
        estimator,
        centre,
        spread,
        valid_records: values.len(),
    }
}

/// Running mean; a plain sum overflows near `f64::MAX`.
fn mean(values: &[f64]) -> f64 {
    values
        .iter()
        .enumerate()
        .fold(0.0, |mean, (i, v)| mean + (v - mean) / (i + 1) as f64)
}

fn median(values: &[f64]) -> f64 {
    median_of(values.to_vec())
}

fn median_of(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        let (lo, hi) = (values[mid - 1], values[mid]);
        lo + (hi - lo) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period() -> Period {
        "2023-01".parse().unwrap()
    }

    fn batch(rows: &[(&str, f64)]) -> Vec<UsageRecord> {
        rows.iter()
            .map(|(id, units)| UsageRecord::new(*id, period(), *units))
            .collect()
    }

    fn result<'a>(scored: &'a ScoredBatch, id: &str) -> &'a ScoreResult {
        scored
            .results
            .iter()
            .find(|r| r.customer_id == id)
            .unwrap()
    }

    #[test]
    fn single_outlier_is_ranked_first_and_high() {
        let records = batch(&[("A", 100.0), ("B", 100.0), ("C", 100.0), ("D", 500.0)]);
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();

        assert_eq!(scored.results[0].customer_id, "D");
        assert_eq!(scored.results[0].risk_tier, RiskTier::High);
        assert!(scored.results[0].deviation > 0.0);
        for id in ["A", "B", "C"] {
            let r = result(&scored, id);
            assert_eq!(r.risk_tier, RiskTier::Low);
            assert!(r.anomaly_score < scored.results[0].anomaly_score);
        }
    }

    #[test]
    fn standard_estimator_still_separates_outlier() {
        let records = batch(&[("A", 100.0), ("B", 100.0), ("C", 100.0), ("D", 500.0)]);
        let config = ScorerConfig {
            spread_estimator: SpreadEstimator::Standard,
            ..Default::default()
        };
        let scored = score_batch(&records, &config).unwrap();

        assert_eq!(scored.reference.centre, 200.0);
        assert_eq!(scored.results[0].customer_id, "D");
        assert!(scored.results[0].risk_tier > result(&scored, "A").risk_tier);
        assert_eq!(result(&scored, "A").risk_tier, RiskTier::Low);
    }

    #[test]
    fn under_consumption_has_negative_deviation() {
        let records = batch(&[
            ("A", 300.0),
            ("B", 310.0),
            ("C", 290.0),
            ("D", 305.0),
            ("E", 20.0),
        ]);
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();

        let e = result(&scored, "E");
        assert_eq!(scored.results[0].customer_id, "E");
        assert!(e.deviation < 0.0);
        assert_eq!(e.anomaly_score, e.deviation.abs());
        assert_eq!(e.risk_tier, RiskTier::High);
    }

    #[test]
    fn result_count_matches_valid_records() {
        let mut records = batch(&[("A", 120.0), ("B", 80.0), ("C", -5.0), ("", 40.0)]);
        records.push(UsageRecord::new("E", period(), f64::NAN));
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();

        assert_eq!(scored.results.len(), 2);
        assert_eq!(scored.reference.valid_records, 2);
        let reasons: Vec<_> = scored.invalid.iter().map(|e| (e.index, e.reason)).collect();
        assert_eq!(
            reasons,
            vec![
                (2, InvalidReason::NegativeConsumption),
                (3, InvalidReason::MissingCustomerId),
                (4, InvalidReason::NonFiniteConsumption),
            ]
        );
        assert_eq!(scored.invalid[0].customer_id.as_deref(), Some("C"));
        assert_eq!(scored.invalid[1].customer_id, None);
    }

    #[test]
    fn identical_consumption_gets_identical_score_and_tier() {
        let records = batch(&[("A", 90.0), ("B", 250.0), ("C", 90.0), ("D", 130.0), ("E", 900.0)]);
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();

        let a = result(&scored, "A");
        let c = result(&scored, "C");
        assert_eq!(a.anomaly_score, c.anomaly_score);
        assert_eq!(a.risk_tier, c.risk_tier);
    }

    #[test]
    fn constant_consumption_scores_zero() {
        let records = batch(&[("A", 75.5), ("B", 75.5), ("C", 75.5)]);
        for estimator in [SpreadEstimator::Robust, SpreadEstimator::Standard] {
            let config = ScorerConfig {
                spread_estimator: estimator,
                ..Default::default()
            };
            let scored = score_batch(&records, &config).unwrap();

            assert_eq!(scored.reference.spread, 0.0);
            assert!(scored.results.iter().all(|r| r.anomaly_score == 0.0));
            assert!(scored.results.iter().all(|r| r.risk_tier == RiskTier::Low));
        }
    }

    #[test]
    fn single_valid_record_gets_sentinel() {
        let records = batch(&[("A", 1000.0), ("B", -1.0)]);
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();

        assert_eq!(scored.results.len(), 1);
        assert_eq!(scored.results[0].anomaly_score, UNDERDETERMINED_SCORE);
        assert_eq!(scored.results[0].risk_tier, RiskTier::Low);
        assert_eq!(scored.invalid.len(), 1);
    }

    #[test]
    fn duplicate_customer_rejects_batch() {
        let records = batch(&[("A", 100.0), ("B", 120.0), (" A ", 130.0)]);
        let err = score_batch(&records, &ScorerConfig::default()).unwrap_err();

        assert_eq!(
            err,
            ScoringError::DuplicateRecord {
                customer_id: "A".to_string(),
                period: period(),
            }
        );
    }

    #[test]
    fn huge_constant_consumption_scores_zero() {
        let records = batch(&[("A", 1e308), ("B", 1e308), ("C", 1e308)]);
        for spread_estimator in [SpreadEstimator::Robust, SpreadEstimator::Standard] {
            let config = ScorerConfig {
                spread_estimator,
                ..Default::default()
            };
            let scored = score_batch(&records, &config).unwrap();

            assert_eq!(scored.reference.centre, 1e308);
            assert_eq!(scored.reference.spread, 0.0);
            assert!(scored.results.iter().all(|r| r.anomaly_score == 0.0 && r.risk_tier == RiskTier::Low));
        }
    }

    #[test]
    fn huge_values_keep_scores_finite() {
        let records = batch(&[("A", 1e308), ("B", 1.5e308), ("C", 1.5e308), ("D", 1e308)]);
        for spread_estimator in [SpreadEstimator::Robust, SpreadEstimator::Standard] {
            let config = ScorerConfig {
                spread_estimator,
                ..Default::default()
            };
            let scored = score_batch(&records, &config).unwrap();

            assert!((scored.reference.centre - 1.25e308).abs() < 1e295);
            assert!(scored.reference.spread.is_finite() && scored.reference.spread > 0.0);
            assert!(scored.results.iter().all(|r| r.anomaly_score.is_finite()));
        }
    }

    #[test]
    fn duplicate_ids_are_checked_after_trimming() {
        let rows = [("A", period()), (" B", period()), ("", period()), ("", period()), ("B ", period())];
        assert_eq!(
            check_duplicates(rows),
            Err(ScoringError::DuplicateRecord {
                customer_id: "B".to_string(),
                period: period(),
            })
        );
        assert_eq!(check_duplicates([("A", period()), ("B", period())]), Ok(()));
    }

    #[test]
    fn duplicate_is_detected_even_when_one_copy_is_invalid() {
        let records = batch(&[("A", 100.0), ("A", -3.0)]);
        assert!(matches!(
            score_batch(&records, &ScorerConfig::default()),
            Err(ScoringError::DuplicateRecord { .. })
        ));
    }

    #[test]
    fn empty_and_all_invalid_batches_fail() {
        assert_eq!(
            score_batch(&[], &ScorerConfig::default()),
            Err(ScoringError::EmptyBatch)
        );

        let records = batch(&[("A", -1.0), ("B", f64::INFINITY)]);
        assert_eq!(
            score_batch(&records, &ScorerConfig::default()),
            Err(ScoringError::EmptyBatch)
        );
    }

    #[test]
    fn scoring_is_idempotent() {
        let records = batch(&[("A", 140.0), ("B", 20.0), ("C", 310.0), ("D", 150.0), ("E", 145.0)]);
        let config = ScorerConfig::default();

        let first = score_batch(&records, &config).unwrap();
        let second = score_batch(&records, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tiers_follow_configured_cuts() {
        let thresholds = TierThresholds::from([1.0, 2.0]);
        assert_eq!(classify(0.99, &thresholds), RiskTier::Low);
        assert_eq!(classify(1.0, &thresholds), RiskTier::Medium);
        assert_eq!(classify(2.0, &thresholds), RiskTier::High);
    }

    #[test]
    fn robust_spread_uses_scaled_mad() {
        let stats = reference_stats(&[1.0, 2.0, 3.0, 4.0, 100.0], SpreadEstimator::Robust);
        assert_eq!(stats.centre, 3.0);
        assert!((stats.spread - MAD_SCALE).abs() < 1e-12);
    }
}
