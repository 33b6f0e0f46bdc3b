//! Gap-up Predictor
//!
//! Inference service for the gap-up classifier plus the shared pieces used by
//! the offline trainer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    GAPPER PREDICTOR                      │
//! ├──────────────────────────────────────────────────────────┤
//! │  startup:  GCS models/ + scalers/ ──► local cache files  │
//! │                                                          │
//! │  request:  POST /predict                                 │
//! │              └─► validate (28) ─► Predictor              │
//! │                                   ├─ StandardScaler      │
//! │                                   └─ Booster             │
//! │                                      (gbdt | LightGBM)   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod model;
pub mod training;

use std::sync::Arc;

use axum::{Router, routing::{get, post}};
use tower_http::{
    cors::{CorsLayer, Any},
    trace::TraceLayer,
    compression::CompressionLayer,
};

pub use error::{AppError, AppResult};

use crate::model::Predictor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub predictor: Arc<Predictor>,
}

impl AppState {
    pub fn new(config: config::Config) -> Self {
        let predictor = Arc::new(Predictor::from_config(&config));
        Self { config, predictor }
    }
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::check))
        .route("/predict", post(handlers::predict::predict))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}
