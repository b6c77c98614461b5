use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Period, RiskTier, ScoreResult, UsageRecord};

/// Confusion counts of predicted tiers against `is_anomaly` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelEvaluation {
    pub positive_tier: RiskTier,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl LabelEvaluation {
    pub fn labelled(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.true_positives + self.true_negatives, self.labelled())
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// Compare scored results with the labels carried by their source records.
///
/// A result counts as a positive prediction when its tier is at least
/// `positive_tier`. Returns `None` when no scored record is labelled.
pub fn evaluate_labels(
    records: &[UsageRecord],
    results: &[ScoreResult],
    positive_tier: RiskTier,
) -> Option<LabelEvaluation> {
    let labels: HashMap<(&str, Period), bool> = records
        .iter()
        .filter_map(|r| Some(((r.customer_id.trim(), r.period), r.is_anomaly?)))
        .collect();

    let mut eval = LabelEvaluation {
        positive_tier,
        ..Default::default()
    };
    for result in results {
        let Some(&actual) = labels.get(&(result.customer_id.as_str(), result.period)) else {
            continue;
        };
        let predicted = result.risk_tier >= positive_tier;
        match (predicted, actual) {
            (true, true) => eval.true_positives += 1,
            (true, false) => eval.false_positives += 1,
            (false, false) => eval.true_negatives += 1,
            (false, true) => eval.false_negatives += 1,
        }
    }

    (eval.labelled() > 0).then_some(eval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{score_batch, ScorerConfig};

    #[test]
    fn counts_confusion_matrix() {
        let period: Period = "2023-03".parse().unwrap();
        let records = vec![
            UsageRecord::new("A", period, 300.0).with_label(false),
            UsageRecord::new("B", period, 310.0).with_label(false),
            UsageRecord::new("C", period, 295.0).with_label(true),
            UsageRecord::new("D", period, 305.0),
            UsageRecord::new("E", period, 15.0).with_label(true),
        ];
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();
        let eval = evaluate_labels(&records, &scored.results, RiskTier::Medium).unwrap();

        assert_eq!(eval.true_positives, 1);
        assert_eq!(eval.false_negatives, 1);
        assert_eq!(eval.true_negatives, 2);
        assert_eq!(eval.false_positives, 0);
        assert_eq!(eval.labelled(), 4);
        assert_eq!(eval.accuracy(), Some(0.75));
        assert_eq!(eval.precision(), Some(1.0));
        assert_eq!(eval.recall(), Some(0.5));
    }

    #[test]
    fn unlabelled_batch_has_no_evaluation() {
        let period: Period = "2023-03".parse().unwrap();
        let records = vec![
            UsageRecord::new("A", period, 300.0),
            UsageRecord::new("B", period, 10.0),
        ];
        let scored = score_batch(&records, &ScorerConfig::default()).unwrap();
        assert_eq!(evaluate_labels(&records, &scored.results, RiskTier::Medium), None);
    }

    #[test]
    fn undefined_ratios_are_none() {
        let eval = LabelEvaluation {
            positive_tier: RiskTier::High,
            true_negatives: 3,
            ..Default::default()
        };
        assert_eq!(eval.precision(), None);
        assert_eq!(eval.recall(), None);
        assert_eq!(eval.accuracy(), Some(1.0));
    }
}
