//! Booster - boosted tree ensemble scoring
//!
//! Two artifact formats end up under `models/`: the `gbdt` JSON model written
//! by `gapper-train`, and LightGBM text dumps from the older pipeline. The
//! format is picked by looking at the file contents, not the extension.

use std::path::Path;

use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;

use super::lightgbm::LightGbmModel;
use super::ModelError;

pub enum Booster {
    /// Trained by `gapper-train` with the log-likelihood loss
    Native(GBDT),
    LightGbm(LightGbmModel),
}

impl std::fmt::Debug for Booster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Booster::Native(_) => f.write_str("Booster::Native"),
            Booster::LightGbm(m) => write!(f, "Booster::LightGbm({} trees)", m.num_trees()),
        }
    }
}

impl Booster {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        if LightGbmModel::looks_like(&content) {
            return LightGbmModel::parse(&content).map(Booster::LightGbm);
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| ModelError::Booster(format!("non UTF-8 model path: {}", path.display())))?;

        GBDT::load_model(path_str)
            .map(Booster::Native)
            .map_err(|e| ModelError::Booster(format!("invalid gbdt model: {}", e)))
    }

    pub fn format(&self) -> &'static str {
        match self {
            Booster::Native(_) => "gbdt",
            Booster::LightGbm(_) => "lightgbm",
        }
    }

    /// Probability of the positive class for one scaled row
    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ModelError> {
        let p = match self {
            Booster::LightGbm(model) => model.predict_proba(row)?,
            Booster::Native(model) => {
                let features = row.iter().map(|&x| x as f32).collect();
                let data: DataVec = vec![Data::new_test_data(features, None)];
                let predicted = model.predict(&data);
                predicted
                    .first()
                    .copied()
                    .map(f64::from)
                    .ok_or_else(|| ModelError::Booster("booster returned no prediction".to_string()))?
            }
        };

        if !p.is_finite() {
            return Err(ModelError::Booster(format!("non-finite score: {}", p)));
        }

        Ok(p.clamp(0.0, 1.0))
    }
}
