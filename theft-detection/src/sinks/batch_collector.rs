use futures::StreamExt;
use usage_client::domain::UsageRecord;

use crate::pipeline::{Envelope, PipelineError, RowRejection, Sink};

/// Everything a pipeline run produced: accepted records and rejected rows.
#[derive(Debug, Default)]
pub struct CollectedBatch {
    pub records: Vec<Envelope<UsageRecord>>,
    pub rejected: Vec<RowRejection>,
}

/// Terminal sink that gathers the whole upload in memory for batch scoring.
///
/// Row-level errors are kept; any other upstream error aborts the run.
#[derive(Clone, Default)]
pub struct BatchCollector;

#[async_trait::async_trait]
impl Sink<UsageRecord> for BatchCollector {
    type Output = CollectedBatch;

    async fn run<S>(&self, mut input: S) -> Result<Self::Output, PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<UsageRecord>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut batch = CollectedBatch::default();

        while let Some(item) = input.next().await {
            match item {
                Ok(env) => batch.records.push(env),
                Err(PipelineError::InvalidRecord(rejection)) => {
                    tracing::warn!(
                        customer_id = rejection.customer_id.as_deref().unwrap_or("-"),
                        "skipping invalid row: {rejection}"
                    );
                    batch.rejected.push(rejection);
                }
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for BatchCollector");
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            accepted = batch.records.len(),
            rejected = batch.rejected.len(),
            "batch collected"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pipeline::Pipeline, sources::UsageCsvSource, transform::UsageValidation};
    use std::sync::Arc;

    #[tokio::test]
    async fn collects_records_and_rejections() {
        let csv = "customer_id,period,consumption\nA,2024-01,10\nB,2024-01,-4\nC,2024-01,x\nD,2024-01,12\n";
        let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
            source: UsageCsvSource::from_bytes("upload.csv", csv.as_bytes()),
            transforms: vec![Arc::new(UsageValidation)],
            sink: BatchCollector,
        };

        let batch = pipeline.run().await.unwrap();
        let ids: Vec<_> = batch.records.iter().map(|e| e.payload.customer_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "D"]);
        let lines: Vec<_> = batch
            .rejected
            .iter()
            .map(|r| r.origin.as_ref().unwrap().line)
            .collect();
        assert_eq!(lines, vec![3, 4]);
    }

    #[tokio::test]
    async fn source_failure_aborts() {
        let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
            source: UsageCsvSource::from_bytes("upload.csv", "foo,bar\n1,2\n".as_bytes()),
            transforms: vec![],
            sink: BatchCollector,
        };

        assert!(matches!(pipeline.run().await, Err(PipelineError::Source(_))));
    }
}
