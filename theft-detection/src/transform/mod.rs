use crate::pipeline::{Envelope, PipelineError, RowRejection, Transform};
use usage_client::{analytics::validate_record, domain::UsageRecord};

/// Pure validation of a `UsageRecord`.
///
/// Rules (shared with the scorer):
/// - customer_id must be present.
/// - consumption must be finite and non-negative.
/// - peak_load_kw, when present, must be finite and non-negative.
pub fn validate_usage_record(env: Envelope<UsageRecord>) -> Result<Envelope<UsageRecord>, PipelineError> {
    let reject = |customer_id: Option<String>, reason: String| {
        PipelineError::InvalidRecord(RowRejection {
            origin: env.origin.clone(),
            customer_id,
            period: Some(env.payload.period),
            reason,
        })
    };

    if let Err(e) = validate_record(0, &env.payload) {
        return Err(reject(e.customer_id, e.reason.to_string()));
    }

    if let Some(kw) = env.payload.peak_load_kw {
        if !kw.is_finite() || kw < 0.0 {
            return Err(reject(
                Some(env.payload.customer_id.clone()),
                "peak_load_kw must be a finite non-negative number".to_string(),
            ));
        }
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct UsageValidation;

#[async_trait::async_trait]
impl Transform<UsageRecord, UsageRecord> for UsageValidation {
    async fn apply(
        &self,
        input: Envelope<UsageRecord>,
    ) -> Result<Envelope<UsageRecord>, PipelineError> {
        match validate_usage_record(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_usage_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RecordOrigin;
    use std::sync::Arc;

    fn envelope(customer_id: &str, consumption: f64, peak: Option<f64>) -> Envelope<UsageRecord> {
        let mut payload = UsageRecord::new(customer_id, "2024-01".parse().unwrap(), consumption);
        payload.peak_load_kw = peak;
        Envelope {
            payload,
            received_at: std::time::SystemTime::now(),
            origin: Some(RecordOrigin {
                source: Arc::from("upload.csv"),
                line: 7,
            }),
        }
    }

    #[test]
    fn usage_validation_accepts_valid_record() {
        let res = validate_usage_record(envelope("m-1", 1.0, Some(0.5)));
        assert!(res.is_ok());
    }

    #[test]
    fn usage_validation_rejects_negative_consumption() {
        let res = validate_usage_record(envelope("m-1", -0.1, None));
        match res {
            Err(PipelineError::InvalidRecord(rej)) => {
                assert_eq!(rej.customer_id.as_deref(), Some("m-1"));
                assert_eq!(rej.origin.map(|o| o.line), Some(7));
                assert_eq!(rej.period, Some("2024-01".parse().unwrap()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn usage_validation_rejects_missing_id() {
        let res = validate_usage_record(envelope("  ", 10.0, None));
        assert!(matches!(res, Err(PipelineError::InvalidRecord(ref rej)) if rej.customer_id.is_none()));
    }

    #[test]
    fn usage_validation_rejects_negative_peak_load() {
        let res = validate_usage_record(envelope("m-1", 10.0, Some(-2.0)));
        assert!(matches!(res, Err(PipelineError::InvalidRecord(_))));
    }
}
