//! Predictor - cached booster + scaler
//!
//! Artifacts are read from their local paths and kept in memory. The cached
//! instance is reused only while both files hash to the same sha256, so every
//! prediction reflects what is currently on disk. Size and mtime are not used:
//! a same-size rewrite within one mtime tick would go unnoticed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Booster, ModelError, StandardScaler, FEATURE_COUNT};
use crate::config::Config;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Prediction output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub probability: f64,
    pub edge: f64,
    pub threshold_met: bool,
}

impl PredictionResult {
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        Self {
            probability,
            edge: probability - 0.5,
            threshold_met: probability > threshold,
        }
    }

    /// Round to 4 decimals for the wire. `edge` is derived from the rounded
    /// probability; `threshold_met` keeps the unrounded decision.
    pub fn rounded(self) -> Self {
        let probability = round4(self.probability);
        Self {
            probability,
            edge: round4(probability - 0.5),
            threshold_met: self.threshold_met,
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    model: [u8; 32],
    scaler: [u8; 32],
}

/// sha256 of one artifact file's contents
fn file_digest(path: &Path) -> Result<[u8; 32], ModelError> {
    let bytes = std::fs::read(path).map_err(|e| ModelError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Sha256::digest(&bytes).into())
}

/// Booster and scaler loaded from one pair of artifact files
#[derive(Debug)]
pub struct LoadedModel {
    pub booster: Booster,
    pub scaler: StandardScaler,
    pub loaded_at: DateTime<Utc>,
    fingerprint: Fingerprint,
}

// ============================================================================
// PREDICTOR
// ============================================================================

pub struct Predictor {
    model_path: PathBuf,
    scaler_path: PathBuf,
    threshold: f64,
    cached: RwLock<Option<Arc<LoadedModel>>>,
}

impl Predictor {
    pub fn new(model_path: impl Into<PathBuf>, scaler_path: impl Into<PathBuf>, threshold: f64) -> Self {
        Self {
            model_path: model_path.into(),
            scaler_path: scaler_path.into(),
            threshold,
            cached: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.model_path, &config.scaler_path, config.threshold)
    }

    /// Whether the model file exists. Says nothing about its validity.
    pub fn model_present(&self) -> bool {
        self.model_path.exists()
    }

    /// Drop the in-memory instance; the next prediction reloads from disk
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            tracing::debug!("Predictor cache invalidated");
        }
    }

    /// Current booster + scaler, reloading if the files changed
    pub fn current(&self) -> Result<Arc<LoadedModel>, ModelError> {
        let fingerprint = match self.fingerprint() {
            Ok(fp) => fp,
            Err(e) => {
                self.invalidate();
                return Err(e);
            }
        };

        if let Some(model) = self.cached.read().as_ref() {
            if model.fingerprint == fingerprint {
                return Ok(Arc::clone(model));
            }
        }

        let booster = Booster::load(&self.model_path)?;
        let scaler = StandardScaler::load(&self.scaler_path)?;

        let loaded_at = Utc::now();
        tracing::info!(
            "Loaded {} booster from {} at {} (scaler: {} features)",
            booster.format(),
            self.model_path.display(),
            loaded_at.to_rfc3339(),
            scaler.n_features()
        );

        let model = Arc::new(LoadedModel {
            booster,
            scaler,
            loaded_at,
            fingerprint,
        });
        *self.cached.write() = Some(Arc::clone(&model));

        Ok(model)
    }

    /// Score one raw feature vector
    pub fn predict(&self, features: &[f64]) -> Result<PredictionResult, ModelError> {
        if features.len() != FEATURE_COUNT {
            return Err(ModelError::FeatureCount {
                expected: FEATURE_COUNT,
                actual: features.len(),
            });
        }

        let model = self.current()?;
        let scaled = model.scaler.transform(features)?;
        let probability = model.booster.predict_proba(&scaled)?;

        Ok(PredictionResult::from_probability(probability, self.threshold))
    }

    fn fingerprint(&self) -> Result<Fingerprint, ModelError> {
        Ok(Fingerprint {
            model: file_digest(&self.model_path)?,
            scaler: file_digest(&self.scaler_path)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::lightgbm::tests::TWO_TREE_MODEL;

    /// Identity scaler over all 28 features
    pub(crate) fn identity_scaler_json() -> String {
        let scaler = StandardScaler {
            mean: vec![0.0; FEATURE_COUNT],
            scale: vec![1.0; FEATURE_COUNT],
            feature_names: Vec::new(),
        };
        serde_json::to_string(&scaler).unwrap()
    }

    pub(crate) fn write_artifacts(dir: &Path) -> (PathBuf, PathBuf) {
        let model_path = dir.join("model.txt");
        let scaler_path = dir.join("scaler.json");
        std::fs::write(&model_path, TWO_TREE_MODEL).unwrap();
        std::fs::write(&scaler_path, identity_scaler_json()).unwrap();
        (model_path, scaler_path)
    }

    #[test]
    fn test_result_derivation() {
        let result = PredictionResult::from_probability(0.8, 0.745);
        assert!(result.threshold_met);
        assert!((result.edge - 0.3).abs() < 1e-12);

        let result = PredictionResult::from_probability(0.745, 0.745);
        assert!(!result.threshold_met);
    }

    #[test]
    fn test_rounding_keeps_edge_consistent() {
        let result = PredictionResult::from_probability(0.656_789_1, 0.745).rounded();
        assert_eq!(result.probability, 0.6568);
        assert_eq!(result.edge, 0.1568);
    }

    #[test]
    fn test_predict_with_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, scaler_path) = write_artifacts(dir.path());
        let predictor = Predictor::new(model_path, scaler_path, 0.745);

        let result = predictor.predict(&[0.0; FEATURE_COUNT]).unwrap();
        // f0 = 0, f1 = 0 lands on leaf 2 (0.1) plus the constant tree (0.25)
        let expected = 1.0 / (1.0 + (-0.35f64).exp());
        assert!((result.probability - expected).abs() < 1e-12);
        assert_eq!(result.threshold_met, expected > 0.745);

        // Same input, same output
        assert_eq!(predictor.predict(&[0.0; FEATURE_COUNT]).unwrap(), result);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, scaler_path) = write_artifacts(dir.path());
        let predictor = Predictor::new(model_path, scaler_path, 0.745);

        let err = predictor.predict(&[0.0; 27]).unwrap_err();
        assert!(matches!(err, ModelError::FeatureCount { expected: 28, actual: 27 }));
    }

    #[test]
    fn test_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Predictor::new(dir.path().join("model.txt"), dir.path().join("scaler.json"), 0.745);

        assert!(!predictor.model_present());
        let err = predictor.predict(&[0.0; FEATURE_COUNT]).unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }

    #[test]
    fn test_reload_after_model_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, scaler_path) = write_artifacts(dir.path());
        let predictor = Predictor::new(&model_path, scaler_path, 0.745);

        let before = predictor.predict(&[0.0; FEATURE_COUNT]).unwrap();

        let rewritten = TWO_TREE_MODEL.replace("leaf_value=0.25", "leaf_value=2.5000");
        std::fs::write(&model_path, rewritten).unwrap();

        let after = predictor.predict(&[0.0; FEATURE_COUNT]).unwrap();
        assert!(after.probability > before.probability);
    }

    #[test]
    fn test_cache_reused_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, scaler_path) = write_artifacts(dir.path());
        let predictor = Predictor::new(model_path, scaler_path, 0.745);

        let first = predictor.current().unwrap();
        let second = predictor.current().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        predictor.invalidate();
        let third = predictor.current().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.loaded_at >= first.loaded_at);
    }

    #[test]
    fn test_reload_after_same_size_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, scaler_path) = write_artifacts(dir.path());
        let predictor = Predictor::new(&model_path, scaler_path, 0.745);

        let first = predictor.current().unwrap();
        let before = predictor.predict(&[0.0; FEATURE_COUNT]).unwrap();

        // Same byte length, written immediately: size and mtime may both match
        let rewritten = TWO_TREE_MODEL.replace("leaf_value=0.25", "leaf_value=0.75");
        assert_eq!(rewritten.len(), TWO_TREE_MODEL.len());
        std::fs::write(&model_path, rewritten).unwrap();

        let after = predictor.predict(&[0.0; FEATURE_COUNT]).unwrap();
        assert!(after.probability > before.probability);
        assert!(!Arc::ptr_eq(&first, &predictor.current().unwrap()));
    }
}
