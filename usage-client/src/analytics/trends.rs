use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::config::TrendRules;
use super::scorer::{validate_record, ScoringError};
use crate::domain::{Period, RiskTier, UsageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendReason {
    PeakLoadDrop,
    ConsumptionDrop,
    ExtremelyLowConsumption,
    PeakLoadInconsistent,
    CombinedDrop,
}

impl TrendReason {
    pub fn description(&self) -> &'static str {
        match self {
            Self::PeakLoadDrop => "Significant peak load drop",
            Self::ConsumptionDrop => "Sudden drop in units consumed",
            Self::ExtremelyLowConsumption => "Extremely low consumption",
            Self::PeakLoadInconsistent => "Peak load inconsistent with consumption",
            Self::CombinedDrop => "Both consumption and peak load dropped significantly",
        }
    }

    fn tier(&self) -> RiskTier {
        match self {
            Self::PeakLoadDrop | Self::ConsumptionDrop => RiskTier::High,
            Self::ExtremelyLowConsumption | Self::PeakLoadInconsistent | Self::CombinedDrop => {
                RiskTier::Medium
            }
        }
    }
}

/// Comparison of one customer's month against the previous month on record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendObservation {
    pub customer_id: String,
    pub prev_period: Period,
    pub current_period: Period,
    pub prev_units: f64,
    pub current_units: f64,
    pub units_change: f64,
    /// Rounded to two decimals; zero when the previous month had no usage.
    pub units_change_pct: f64,
    pub prev_peak_load: Option<f64>,
    pub current_peak_load: Option<f64>,
    pub peak_load_change: Option<f64>,
    pub peak_load_change_pct: Option<f64>,
    pub is_suspicious: bool,
    pub risk_tier: RiskTier,
    pub reasons: Vec<TrendReason>,
}

impl TrendObservation {
    /// Reasons joined for display, or `Normal` when nothing fired.
    pub fn reasons_label(&self) -> String {
        if self.reasons.is_empty() {
            return "Normal".to_string();
        }
        self.reasons
            .iter()
            .map(TrendReason::description)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Month-over-month rule checks for every customer with at least two valid
/// periods. Output is ordered by customer, then period.
pub fn analyze_trends(
    records: &[UsageRecord],
    rules: &TrendRules,
) -> Result<Vec<TrendObservation>, ScoringError> {
    let mut by_customer: BTreeMap<&str, Vec<&UsageRecord>> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        if validate_record(index, record).is_ok() {
            by_customer
                .entry(record.customer_id.trim())
                .or_default()
                .push(record);
        }
    }

    let mut observations = Vec::new();
    for (customer_id, mut history) in by_customer {
        history.sort_by_key(|r| r.period);

        for pair in history.windows(2) {
            let (prev, current) = (pair[0], pair[1]);
            if prev.period == current.period {
                return Err(ScoringError::DuplicateRecord {
                    customer_id: customer_id.to_string(),
                    period: current.period,
                });
            }
            observations.push(compare(customer_id, prev, current, rules));
        }
    }

    Ok(observations)
}

fn compare(
    customer_id: &str,
    prev: &UsageRecord,
    current: &UsageRecord,
    rules: &TrendRules,
) -> TrendObservation {
    let units_change = current.consumption - prev.consumption;
    let units_change_pct = pct_change(prev.consumption, current.consumption);

    let peak = match (prev.peak_load_kw, current.peak_load_kw) {
        (Some(p), Some(c)) => Some((c - p, pct_change(p, c))),
        _ => None,
    };
    let peak_change_pct = peak.map(|(_, pct)| pct);

    let mut reasons = Vec::new();
    if peak_change_pct.is_some_and(|pct| pct <= -rules.peak_load_drop_pct) {
        reasons.push(TrendReason::PeakLoadDrop);
    }
    if units_change_pct <= -rules.units_drop_pct {
        reasons.push(TrendReason::ConsumptionDrop);
    }
    if current.consumption < rules.min_units {
        reasons.push(TrendReason::ExtremelyLowConsumption);
    }
    if current.consumption > rules.high_units
        && current.peak_load_kw.is_some_and(|kw| kw < rules.min_peak_load_kw)
    {
        reasons.push(TrendReason::PeakLoadInconsistent);
    }
    if units_change_pct <= -rules.combined_drop_pct
        && peak_change_pct.is_some_and(|pct| pct <= -rules.combined_drop_pct)
    {
        reasons.push(TrendReason::CombinedDrop);
    }

    let risk_tier = reasons
        .iter()
        .map(TrendReason::tier)
        .max()
        .unwrap_or(RiskTier::Low);

    TrendObservation {
        customer_id: customer_id.to_string(),
        prev_period: prev.period,
        current_period: current.period,
        prev_units: prev.consumption,
        current_units: current.consumption,
        units_change,
        units_change_pct: round2(units_change_pct),
        prev_peak_load: prev.peak_load_kw,
        current_peak_load: current.peak_load_kw,
        peak_load_change: peak.map(|(change, _)| round2(change)),
        peak_load_change_pct: peak_change_pct.map(round2),
        is_suspicious: !reasons.is_empty(),
        risk_tier,
        reasons,
    }
}

fn pct_change(prev: f64, current: f64) -> f64 {
    if prev > 0.0 {
        (current - prev) / prev * 100.0
    } else {
        0.0
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
