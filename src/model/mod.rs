//! Model Module - Booster + Scaler inference
//!
//! Artifact parsing, feature scaling and the cached predictor used by the
//! HTTP handlers. Training lives in `crate::training`.

pub mod booster;
pub mod lightgbm;
pub mod predictor;
pub mod scaler;

// Re-export common types
pub use booster::Booster;
pub use predictor::{PredictionResult, Predictor};
pub use scaler::StandardScaler;

/// Length of the positional feature vector
pub const FEATURE_COUNT: usize = 28;

/// Column names used by the training dataset (`f0`..`f27`)
pub fn feature_names() -> Vec<String> {
    (0..FEATURE_COUNT).map(|i| format!("f{}", i)).collect()
}

/// Errors raised while loading artifacts or scoring
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("feature count mismatch: expected {expected}, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("scaler error: {0}")]
    Scaler(String),
    #[error("booster error: {0}")]
    Booster(String),
}
