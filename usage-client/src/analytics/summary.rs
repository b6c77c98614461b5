use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{scorer::validate_record, trends::TrendObservation};
use crate::domain::{Period, RiskTier, UsageRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub customer_id: String,
    pub total_months: usize,
    pub avg_units: f64,
    pub avg_peak_load: Option<f64>,
    /// Sample standard deviation of monthly units.
    pub units_volatility: Option<f64>,
    pub peak_load_volatility: Option<f64>,
    pub suspicious_periods: usize,
    pub total_comparisons: usize,
    pub overall_risk: RiskTier,
    pub latest_period: Period,
    pub latest_units: f64,
    pub latest_peak_load: Option<f64>,
}

/// Roll each customer's valid history and trend observations up into one row.
///
/// Overall risk comes from the share of suspicious month-over-month
/// comparisons: above one half is High, above one quarter Medium.
pub fn summarize_customers(records: &[UsageRecord], trends: &[TrendObservation]) -> Vec<CustomerSummary> {
    let mut by_customer: BTreeMap<&str, Vec<&UsageRecord>> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        if validate_record(index, record).is_ok() {
            by_customer
                .entry(record.customer_id.trim())
                .or_default()
                .push(record);
        }
    }

    let mut comparisons: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for t in trends {
        let entry = comparisons.entry(t.customer_id.as_str()).or_default();
        entry.0 += usize::from(t.is_suspicious);
        entry.1 += 1;
    }

    by_customer
        .into_iter()
        .filter_map(|(customer_id, history)| {
            let latest = history.iter().max_by_key(|r| r.period)?;
            let units: Vec<f64> = history.iter().map(|r| r.consumption).collect();
            let peaks: Vec<f64> = history.iter().filter_map(|r| r.peak_load_kw).collect();
            let (suspicious_periods, total_comparisons) =
                comparisons.get(customer_id).copied().unwrap_or_default();

            Some(CustomerSummary {
                customer_id: customer_id.to_string(),
                total_months: history.len(),
                avg_units: round2(mean(&units)?),
                avg_peak_load: mean(&peaks).map(round2),
                units_volatility: sample_std(&units).map(round2),
                peak_load_volatility: sample_std(&peaks).map(round2),
                suspicious_periods,
                total_comparisons,
                overall_risk: overall_risk(suspicious_periods, total_comparisons),
                latest_period: latest.period,
                latest_units: latest.consumption,
                latest_peak_load: latest.peak_load_kw,
            })
        })
        .collect()
}

fn overall_risk(suspicious: usize, total: usize) -> RiskTier {
    if total == 0 {
        return RiskTier::Low;
    }
    let ratio = suspicious as f64 / total as f64;
    if ratio > 0.5 {
        RiskTier::High
    } else if ratio > 0.25 {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
