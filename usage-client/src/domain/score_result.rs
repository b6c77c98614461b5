use std::fmt;

use serde::{Deserialize, Serialize};

use super::Period;

/// Discretised risk classification. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Scoring outcome for one customer within one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub customer_id: String,
    pub period: Period,
    pub consumption: f64,
    /// Signed distance from the batch centre in spread units. Negative means
    /// the customer consumed less than the reference population.
    pub deviation: f64,
    pub anomaly_score: f64,
    pub risk_tier: RiskTier,
}
