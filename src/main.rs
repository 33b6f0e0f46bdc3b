//! Gap-up Predictor Server
//!
//! Refreshes the local model cache from GCS once, then serves `/health` and
//! `/predict`.

use std::net::SocketAddr;

use gapper_predictor::{artifacts, config::Config, create_router, logging, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Initialize logging
    logging::init("gapper_predictor=debug,tower_http=debug");

    tracing::info!("Gapper predictor starting...");
    tracing::info!("Bucket: {}, model cache: {}", config.bucket, config.model_path.display());

    let state = AppState::new(config.clone());

    // Startup artifact refresh, never fatal
    if config.skip_refresh {
        tracing::info!("Artifact refresh skipped (SKIP_ARTIFACT_REFRESH)");
    } else {
        artifacts::startup_refresh(artifacts::gcs_store(&config.bucket), &state).await;
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
