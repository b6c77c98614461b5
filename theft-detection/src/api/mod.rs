use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use usage_client::{analytics::ScoringError, domain::UsageRecord};

use crate::{
    config::AppConfig,
    pipeline::{Pipeline, PipelineError},
    report::AnalysisReport,
    sinks::BatchCollector,
    sources::UsageCsvSource,
    transform::UsageValidation,
};

#[derive(Clone)]
pub struct ApiState {
    config: Arc<AppConfig>,
}

impl ApiState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Pipeline(PipelineError::Source(_)) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Scoring(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Score a CSV upload (request body) and return the full analysis report.
async fn analyze(State(state): State<ApiState>, body: Bytes) -> Result<Json<AnalysisReport>, ApiError> {
    metrics::counter!("http_analyze_requests_total").increment(1);

    let pipeline: Pipeline<_, UsageRecord, _> = Pipeline {
        source: UsageCsvSource::from_bytes("upload", body.as_ref()),
        transforms: vec![Arc::new(UsageValidation)],
        sink: BatchCollector,
    };

    let collected = pipeline.run().await.map_err(|e| {
        tracing::warn!(error = %e, "upload rejected");
        e
    })?;
    let report = AnalysisReport::build(collected, &state.config).map_err(|e| {
        tracing::warn!(error = %e, "upload has no valid records");
        e
    })?;

    tracing::info!(
        fingerprint = %report.fingerprint,
        records = report.total_records,
        periods = report.periods.len(),
        rejected_rows = report.rejected_rows.len(),
        "upload analyzed"
    );
    Ok(Json(report))
}
