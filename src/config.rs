//! Configuration module

use std::env;
use std::path::PathBuf;

/// Default bucket holding model and scaler artifacts
pub const DEFAULT_BUCKET: &str = "alphastream-models";

/// Default decision threshold for `threshold_met`
pub const DEFAULT_THRESHOLD: f64 = 0.745;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Artifact bucket name
    pub bucket: String,

    /// Prefix listing versioned model files
    pub model_prefix: String,

    /// Fixed key of the scaler object. JSON, replacing the older
    /// `scalers/scaler_v24.pkl` pickle key.
    pub scaler_key: String,

    /// Local path of the cached booster
    pub model_path: PathBuf,

    /// Local path of the cached scaler
    pub scaler_path: PathBuf,

    /// Probability cutoff for `threshold_met`
    pub threshold: f64,

    /// Server port
    pub port: u16,

    /// Skip the startup artifact download (local development)
    pub skip_refresh: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            model_prefix: "models/".to_string(),
            scaler_key: "scalers/scaler_v24.json".to_string(),
            model_path: PathBuf::from("/tmp/model.txt"),
            scaler_path: PathBuf::from("/tmp/scaler.json"),
            threshold: DEFAULT_THRESHOLD,
            port: 8080,
            skip_refresh: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bucket: env::var("MODEL_BUCKET").unwrap_or(defaults.bucket),

            model_prefix: env::var("MODEL_PREFIX").unwrap_or(defaults.model_prefix),

            scaler_key: env::var("SCALER_KEY").unwrap_or(defaults.scaler_key),

            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),

            scaler_path: env::var("SCALER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.scaler_path),

            threshold: env::var("PREDICT_THRESHOLD")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.threshold),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),

            skip_refresh: env::var("SKIP_ARTIFACT_REFRESH")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}
