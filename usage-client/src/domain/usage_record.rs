use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Period;

/// One customer's metered consumption for one billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub customer_id: String,
    pub period: Period,
    /// Units consumed (kWh).
    pub consumption: f64,
    pub peak_load_kw: Option<f64>,
    /// Pre-labelled ground truth, when the upload carries one.
    pub is_anomaly: Option<bool>,
    /// Pass-through columns (connection type, billing tier, ...). Not scored.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl UsageRecord {
    pub fn new(customer_id: impl Into<String>, period: Period, consumption: f64) -> Self {
        Self {
            customer_id: customer_id.into(),
            period,
            consumption,
            peak_load_kw: None,
            is_anomaly: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_peak_load(mut self, peak_load_kw: f64) -> Self {
        self.peak_load_kw = Some(peak_load_kw);
        self
    }

    pub fn with_label(mut self, is_anomaly: bool) -> Self {
        self.is_anomaly = Some(is_anomaly);
        self
    }
}
