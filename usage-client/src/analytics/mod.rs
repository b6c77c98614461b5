//! Pure, in-memory analytics over usage batches.
//!
//! Nothing in here performs I/O or logging; every function is a deterministic
//! mapping from its inputs to its outputs and is safe to call from any thread.

pub mod config;
pub mod evaluation;
pub mod scorer;
pub mod summary;
pub mod trends;

pub use config::{ConfigError, ScorerConfig, SpreadEstimator, TierThresholds, TrendRules};
pub use evaluation::{evaluate_labels, LabelEvaluation};
pub use scorer::{
    check_duplicates, score_batch, validate_record, InvalidReason, InvalidRecord, ReferenceStats, ScoredBatch,
    ScoringError, UNDERDETERMINED_SCORE,
};
pub use summary::{summarize_customers, CustomerSummary};
pub use trends::{analyze_trends, TrendObservation, TrendReason};
