//! Feature Scaler
//!
//! Standardization `(x - mean) / scale` fitted offline and stored as JSON
//! next to the booster.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Fitted standard scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,

    /// Column names used at fit time, informational only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_names: Vec<String>,
}

impl StandardScaler {
    /// Fit on row-major samples using population statistics.
    ///
    /// Columns with zero variance get a scale of 1.0 so they map to 0.
    pub fn fit(rows: &[Vec<f64>], n_features: usize) -> Result<Self, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::Scaler("cannot fit scaler on an empty dataset".to_string()));
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; n_features];
        for row in rows {
            if row.len() != n_features {
                return Err(ModelError::FeatureCount {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; n_features];
        for row in rows {
            for ((v, x), m) in var.iter_mut().zip(row).zip(&mean) {
                *v += (x - m).powi(2);
            }
        }

        let scale = var
            .into_iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std > 0.0 { std } else { 1.0 }
            })
            .collect();

        Ok(Self {
            mean,
            scale,
            feature_names: Vec::new(),
        })
    }

    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = names;
        self
    }

    /// Number of features the scaler was fitted on
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn from_json(content: &str) -> Result<Self, ModelError> {
        let scaler: StandardScaler = serde_json::from_str(content)
            .map_err(|e| ModelError::Scaler(format!("invalid scaler artifact: {}", e)))?;

        if scaler.mean.len() != scaler.scale.len() {
            return Err(ModelError::Scaler(format!(
                "mean has {} entries but scale has {}",
                scaler.mean.len(),
                scaler.scale.len()
            )));
        }

        Ok(scaler)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ModelError::Scaler(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Transform a single row
    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ModelError> {
        if features.len() != self.n_features() {
            return Err(ModelError::FeatureCount {
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (x - m) / s
            })
            .collect())
    }
}
