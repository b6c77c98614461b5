use anyhow::Result;
use std::net::SocketAddr;
use theft_detection::{
    api::{self, ApiState},
    config::AppConfig,
    metrics_server, observability,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.bind_addr: {e}"))?;

    tracing::info!(
        %addr,
        spread_estimator = ?cfg.scoring.spread_estimator,
        low_cut = cfg.scoring.tier_thresholds.low_cut,
        high_cut = cfg.scoring.tier_thresholds.high_cut,
        "theft detection API starting"
    );

    let app = api::router(ApiState::new(cfg));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
