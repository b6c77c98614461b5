use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use usage_client::{
    analytics::{
        analyze_trends, check_duplicates, evaluate_labels, score_batch, summarize_customers, CustomerSummary,
        LabelEvaluation, ScoredBatch, ScoringError, TrendObservation,
    },
    domain::{Period, RiskTier, UsageRecord},
};

use crate::{
    config::AppConfig,
    pipeline::{Envelope, RecordOrigin, RowRejection},
    sinks::CollectedBatch,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodOutcome {
    Scored(ScoredBatch),
    Rejected { error: ScoringError },
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub period: Period,
    pub records: usize,
    pub outcome: PeriodOutcome,
}

impl PeriodReport {
    pub fn scored(&self) -> Option<&ScoredBatch> {
        match &self.outcome {
            PeriodOutcome::Scored(batch) => Some(batch),
            PeriodOutcome::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl RiskCounts {
    fn from_tiers(tiers: impl Iterator<Item = RiskTier>) -> Self {
        tiers.fold(Self::default(), |mut acc, tier| {
            match tier {
                RiskTier::High => acc.high += 1,
                RiskTier::Medium => acc.medium += 1,
                RiskTier::Low => acc.low += 1,
            }
            acc
        })
    }
}

/// Everything the presentation layer needs for one upload.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// blake3 digest of the accepted records; identical uploads share it.
    pub fingerprint: String,
    pub total_records: usize,
    pub customers: usize,
    pub periods: Vec<PeriodReport>,
    pub rejected_rows: Vec<RowRejection>,
    pub trends: Vec<TrendObservation>,
    pub summaries: Vec<CustomerSummary>,
    /// Overall risk of each customer summary.
    pub customer_risk: RiskCounts,
    /// Percentage of month-over-month comparisons flagged suspicious.
    pub suspicious_rate_pct: Option<f64>,
    pub evaluation: Option<LabelEvaluation>,
}

impl AnalysisReport {
    /// Score every period of a collected upload as its own batch and attach
    /// the cross-period trend analysis.
    ///
    /// A period that fails batch-level checks is reported as rejected and its
    /// records are left out of trends and summaries. Rows rejected upstream
    /// still count towards a period's duplicate check when their customer id
    /// and period are known. Fails with `EmptyBatch` when the upload holds no
    /// valid record at all.
    pub fn build(collected: CollectedBatch, cfg: &AppConfig) -> Result<Self, ScoringError> {
        let CollectedBatch { records, mut rejected } = collected;
        if records.is_empty() {
            metrics::counter!("scoring_batches_rejected_total").increment(1);
            return Err(ScoringError::EmptyBatch);
        }

        let fingerprint = fingerprint(&records);
        let total_records = records.len();

        let mut by_period: BTreeMap<Period, Vec<Envelope<UsageRecord>>> = BTreeMap::new();
        for env in records {
            by_period.entry(env.payload.period).or_default().push(env);
        }

        let mut periods = Vec::with_capacity(by_period.len());
        let mut accepted: Vec<UsageRecord> = Vec::with_capacity(total_records);
        for (period, envelopes) in by_period {
            let (origins, batch): (Vec<Option<RecordOrigin>>, Vec<UsageRecord>) =
                envelopes.into_iter().map(|e| (e.origin, e.payload)).unzip();

            metrics::counter!("scoring_batches_total").increment(1);
            let rejected_ids = rejected
                .iter()
                .filter(|r| r.period == Some(period))
                .filter_map(|r| r.customer_id.as_deref().map(|id| (id, period)));
            let checked = check_duplicates(
                batch
                    .iter()
                    .map(|r| (r.customer_id.as_str(), r.period))
                    .chain(rejected_ids),
            );

            let outcome = match checked.and_then(|()| score_batch(&batch, &cfg.scoring)) {
                Ok(scored) => {
                    rejected.extend(scored.invalid.iter().map(|inv| RowRejection {
                        origin: origins.get(inv.index).cloned().flatten(),
                        customer_id: inv.customer_id.clone(),
                        period: Some(period),
                        reason: inv.reason.to_string(),
                    }));
                    tracing::info!(
                        %period,
                        scored = scored.results.len(),
                        high = scored.count_tier(RiskTier::High),
                        medium = scored.count_tier(RiskTier::Medium),
                        centre = scored.reference.centre,
                        spread = scored.reference.spread,
                        "period scored"
                    );
                    let invalid: HashSet<usize> = scored.invalid.iter().map(|inv| inv.index).collect();
                    accepted.extend(
                        batch
                            .iter()
                            .enumerate()
                            .filter(|(idx, _)| !invalid.contains(idx))
                            .map(|(_, r)| r.clone()),
                    );
                    PeriodOutcome::Scored(scored)
                }
                Err(error) => {
                    metrics::counter!("scoring_batches_rejected_total").increment(1);
                    tracing::warn!(%period, %error, "period rejected");
                    PeriodOutcome::Rejected { error }
                }
            };

            periods.push(PeriodReport {
                period,
                records: batch.len(),
                outcome,
            });
        }

        let trends = analyze_trends(&accepted, &cfg.trends)?;
        let summaries = summarize_customers(&accepted, &trends);
        let customer_risk = RiskCounts::from_tiers(summaries.iter().map(|s| s.overall_risk));
        let suspicious_rate_pct = (!trends.is_empty()).then(|| {
            let suspicious = trends.iter().filter(|t| t.is_suspicious).count();
            suspicious as f64 / trends.len() as f64 * 100.0
        });

        let scored_results: Vec<_> = periods
            .iter()
            .filter_map(PeriodReport::scored)
            .flat_map(|b| b.results.iter().cloned())
            .collect();
        let evaluation = evaluate_labels(&accepted, &scored_results, cfg.evaluation.positive_tier);

        let customers = periods
            .iter()
            .filter_map(PeriodReport::scored)
            .flat_map(|b| b.results.iter().map(|r| r.customer_id.as_str()))
            .collect::<BTreeSet<_>>()
            .len();

        Ok(Self {
            fingerprint,
            total_records,
            customers,
            periods,
            rejected_rows: rejected,
            trends,
            summaries,
            customer_risk,
            suspicious_rate_pct,
            evaluation,
        })
    }

    pub fn scored_periods(&self) -> impl Iterator<Item = (Period, &ScoredBatch)> {
        self.periods.iter().filter_map(|p| p.scored().map(|b| (p.period, b)))
    }
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_f64(hasher: &mut blake3::Hasher, v: Option<f64>) {
    match v {
        Some(x) => {
            hasher.update(&[1]);
            hasher.update(&x.to_bits().to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// Order-independent digest of the scored inputs.
fn fingerprint(records: &[Envelope<UsageRecord>]) -> String {
    let mut rows: Vec<&UsageRecord> = records.iter().map(|e| &e.payload).collect();
    rows.sort_by(|a, b| {
        a.period
            .cmp(&b.period)
            .then_with(|| a.customer_id.cmp(&b.customer_id))
            .then_with(|| a.consumption.total_cmp(&b.consumption))
    });

    let mut hasher = blake3::Hasher::new();
    for r in rows {
        hash_str(&mut hasher, r.customer_id.trim());
        hash_str(&mut hasher, &r.period.to_string());
        hash_opt_f64(&mut hasher, Some(r.consumption));
        hash_opt_f64(&mut hasher, r.peak_load_kw);
    }
    hasher.finalize().to_hex().to_string()
}
