pub mod period;
pub mod score_result;
pub mod usage_record;

pub use period::{Period, PeriodParseError};
pub use score_result::{RiskTier, ScoreResult};
pub use usage_record::UsageRecord;
