//! Offline training
//!
//! Loads the labeled CSV, fits the scaler, trains the booster and writes both
//! artifacts under the keys the server downloads.

use std::io::Read;
use std::path::{Path, PathBuf};

use gbdt::config::Config as GbdtConfig;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;

use crate::model::{feature_names, ModelError, StandardScaler, FEATURE_COUNT};

/// Object key (and relative local path) of the trained booster
pub const MODEL_KEY: &str = "models/gapper_gbdt_v24.json";

/// Object key (and relative local path) of the fitted scaler
pub const SCALER_KEY: &str = "scalers/scaler_v24.json";

pub const TARGET_COLUMN: &str = "target";

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column: {0}")]
    MissingColumn(String),
    #[error("row {row}: invalid value {value:?} in column {column}")]
    InvalidValue { row: usize, column: String, value: String },
    #[error("row {row}: target must be 0 or 1, got {value:?}")]
    InvalidTarget { row: usize, value: String },
    #[error("dataset has no rows")]
    Empty,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to write {path}: {message}")]
    Save { path: PathBuf, message: String },
}

/// Labeled feature rows
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<bool>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.targets.iter().filter(|t| **t).count()
    }

    /// Read a CSV with a header containing `f0`..`f27` and `target`.
    /// Extra columns are ignored.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TrainingError> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| TrainingError::MissingColumn(name.to_string()))
        };

        let names = feature_names();
        let feature_idx = names
            .iter()
            .map(|n| column(n.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let target_idx = column(TARGET_COLUMN)?;

        let mut dataset = Dataset::default();
        for (i, record) in csv.records().enumerate() {
            let record = record?;
            // Header is line 1
            let row = i + 2;

            let mut features = Vec::with_capacity(FEATURE_COUNT);
            for (name, &idx) in names.iter().zip(&feature_idx) {
                let raw = record.get(idx).unwrap_or("").trim();
                let value: f64 = raw
                    .parse()
                    .ok()
                    .filter(|v: &f64| v.is_finite())
                    .ok_or_else(|| TrainingError::InvalidValue {
                        row,
                        column: name.clone(),
                        value: raw.to_string(),
                    })?;
                features.push(value);
            }

            let raw_target = record.get(target_idx).unwrap_or("").trim();
            let target = match raw_target.parse::<f64>() {
                Ok(v) if v == 0.0 => false,
                Ok(v) if v == 1.0 => true,
                _ => {
                    return Err(TrainingError::InvalidTarget {
                        row,
                        value: raw_target.to_string(),
                    })
                }
            };

            dataset.rows.push(features);
            dataset.targets.push(target);
        }

        if dataset.is_empty() {
            return Err(TrainingError::Empty);
        }

        Ok(dataset)
    }

    pub fn from_path(path: &Path) -> Result<Self, TrainingError> {
        let file = std::fs::File::open(path).map_err(|e| ModelError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_reader(file)
    }
}

/// Booster hyperparameters
#[derive(Debug, Clone)]
pub struct TrainParams {
    pub learning_rate: f32,
    /// Depth-wise growth; depth 6 gives the 64-leaf budget
    pub max_depth: u32,
    pub iterations: usize,
    pub feature_sample_ratio: f64,
    pub data_sample_ratio: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            max_depth: 6,
            iterations: 800,
            feature_sample_ratio: 0.8,
            data_sample_ratio: 0.8,
        }
    }
}

/// Training-set fit statistics
#[derive(Debug, Clone, Copy)]
pub struct TrainingMetrics {
    pub log_loss: f64,
    pub accuracy: f64,
}

pub struct TrainedModel {
    pub booster: GBDT,
    pub scaler: StandardScaler,
    pub metrics: TrainingMetrics,
}

impl TrainedModel {
    /// Write `models/...` and `scalers/...` below `out_dir`
    pub fn save(&self, out_dir: &Path) -> Result<(PathBuf, PathBuf), TrainingError> {
        let model_path = out_dir.join(MODEL_KEY);
        let scaler_path = out_dir.join(SCALER_KEY);

        for path in [&model_path, &scaler_path] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TrainingError::Save {
                    path: parent.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
        }

        let model_str = model_path.to_str().ok_or_else(|| TrainingError::Save {
            path: model_path.clone(),
            message: "path is not valid UTF-8".to_string(),
        })?;
        self.booster
            .save_model(model_str)
            .map_err(|e| TrainingError::Save {
                path: model_path.clone(),
                message: e.to_string(),
            })?;

        self.scaler.save(&scaler_path)?;

        tracing::info!("Saved {} and {}", model_path.display(), scaler_path.display());
        Ok((model_path, scaler_path))
    }
}

/// Fit the scaler, then the booster on scaled features
pub fn train(dataset: &Dataset, params: &TrainParams) -> Result<TrainedModel, TrainingError> {
    if dataset.is_empty() {
        return Err(TrainingError::Empty);
    }

    let scaler = StandardScaler::fit(&dataset.rows, FEATURE_COUNT)?
        .with_feature_names(feature_names());

    let scaled = dataset
        .rows
        .iter()
        .map(|row| scaler.transform(row))
        .collect::<Result<Vec<_>, _>>()?;

    let mut cfg = GbdtConfig::new();
    cfg.set_feature_size(FEATURE_COUNT);
    cfg.set_max_depth(params.max_depth);
    cfg.set_iterations(params.iterations);
    cfg.set_shrinkage(params.learning_rate);
    cfg.set_loss("LogLikelyhood");
    cfg.set_debug(false);
    cfg.set_data_sample_ratio(params.data_sample_ratio);
    cfg.set_feature_sample_ratio(params.feature_sample_ratio);
    cfg.set_training_optimization_level(2);

    // Log-likelihood loss expects labels in {-1, 1}
    let mut train_data: DataVec = scaled
        .iter()
        .zip(&dataset.targets)
        .map(|(row, &target)| {
            let label = if target { 1.0 } else { -1.0 };
            Data::new_training_data(to_f32(row), 1.0, label, None)
        })
        .collect();

    tracing::info!(
        "Training on {} rows ({} positive), {} rounds, lr {}",
        dataset.len(),
        dataset.positives(),
        params.iterations,
        params.learning_rate
    );

    let mut booster = GBDT::new(&cfg);
    booster.fit(&mut train_data);

    let predictions = predict_rows(&booster, &scaled);
    let metrics = evaluate(&predictions, &dataset.targets);
    tracing::info!(
        "Training log-loss {:.4}, accuracy {:.4}",
        metrics.log_loss,
        metrics.accuracy
    );

    Ok(TrainedModel {
        booster,
        scaler,
        metrics,
    })
}

/// Log-loss and accuracy at 0.5
pub fn evaluate(probabilities: &[f64], targets: &[bool]) -> TrainingMetrics {
    const EPS: f64 = 1e-15;

    let n = probabilities.len().min(targets.len());
    if n == 0 {
        return TrainingMetrics {
            log_loss: 0.0,
            accuracy: 0.0,
        };
    }

    let mut loss = 0.0;
    let mut correct = 0usize;
    for (&p, &t) in probabilities.iter().zip(targets) {
        let p = p.clamp(EPS, 1.0 - EPS);
        loss -= if t { p.ln() } else { (1.0 - p).ln() };
        if (p > 0.5) == t {
            correct += 1;
        }
    }

    TrainingMetrics {
        log_loss: loss / n as f64,
        accuracy: correct as f64 / n as f64,
    }
}

fn predict_rows(booster: &GBDT, scaled: &[Vec<f64>]) -> Vec<f64> {
    let data: DataVec = scaled
        .iter()
        .map(|row| Data::new_test_data(to_f32(row), None))
        .collect();
    booster.predict(&data).into_iter().map(f64::from).collect()
}

fn to_f32(row: &[f64]) -> Vec<f32> {
    row.iter().map(|&x| x as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Booster;

    fn header() -> String {
        let mut cols = feature_names();
        cols.push("symbol".to_string());
        cols.push(TARGET_COLUMN.to_string());
        cols.join(",")
    }

    fn csv_row(f0: f64, target: u8) -> String {
        let mut cols: Vec<String> = (0..FEATURE_COUNT).map(|i| (i as f64 * 0.1).to_string()).collect();
        cols[0] = f0.to_string();
        cols.push("ABC".to_string());
        cols.push(target.to_string());
        cols.join(",")
    }

    /// Positives have f0 >= 1, negatives f0 < 0
    fn separable_csv(n: usize) -> String {
        let mut lines = vec![header()];
        for i in 0..n {
            let positive = i % 2 == 0;
            let f0 = if positive { 1.0 + i as f64 * 0.01 } else { -1.0 - i as f64 * 0.01 };
            lines.push(csv_row(f0, positive as u8));
        }
        lines.join("\n")
    }

    #[test]
    fn test_load_dataset() {
        let dataset = Dataset::from_reader(separable_csv(10).as_bytes()).unwrap();
        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.positives(), 5);
        assert_eq!(dataset.rows[0].len(), FEATURE_COUNT);
        assert_eq!(dataset.rows[0][0], 1.0);
    }

    #[test]
    fn test_missing_column() {
        let csv = "f0,f1,target\n1,2,0\n";
        let err = Dataset::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, TrainingError::MissingColumn(ref c) if c == "f2"));
    }

    #[test]
    fn test_invalid_target_reports_row() {
        let csv = format!("{}\n{}\n{}", header(), csv_row(1.0, 1), csv_row(1.0, 2));
        let err = Dataset::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidTarget { row: 3, .. }));
    }

    #[test]
    fn test_non_finite_feature_rejected() {
        let csv = format!("{}\n{}", header(), csv_row(f64::NAN, 1));
        let err = Dataset::from_reader(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidValue { row: 2, .. }));
    }

    #[test]
    fn test_empty_dataset() {
        let err = Dataset::from_reader(header().as_bytes()).unwrap_err();
        assert!(matches!(err, TrainingError::Empty));
    }

    #[test]
    fn test_evaluate() {
        let metrics = evaluate(&[0.9, 0.2, 0.6], &[true, false, false]);
        assert!((metrics.accuracy - 2.0 / 3.0).abs() < 1e-12);
        let expected = -(0.9f64.ln() + 0.8f64.ln() + 0.4f64.ln()) / 3.0;
        assert!((metrics.log_loss - expected).abs() < 1e-12);
    }

    #[test]
    fn test_train_save_and_load() {
        let dataset = Dataset::from_reader(separable_csv(40).as_bytes()).unwrap();
        let params = TrainParams {
            learning_rate: 0.1,
            max_depth: 3,
            iterations: 20,
            feature_sample_ratio: 1.0,
            data_sample_ratio: 1.0,
        };

        let trained = train(&dataset, &params).unwrap();
        assert_eq!(trained.scaler.n_features(), FEATURE_COUNT);

        let dir = tempfile::tempdir().unwrap();
        let (model_path, scaler_path) = trained.save(dir.path()).unwrap();
        assert!(model_path.ends_with(MODEL_KEY));
        assert!(scaler_path.ends_with(SCALER_KEY));

        // Served through the same path as downloaded artifacts
        let booster = Booster::load(&model_path).unwrap();
        assert_eq!(booster.format(), "gbdt");
        let scaler = StandardScaler::load(&scaler_path).unwrap();

        let positive = scaler.transform(&dataset.rows[0]).unwrap();
        let negative = scaler.transform(&dataset.rows[1]).unwrap();
        let p_pos = booster.predict_proba(&positive).unwrap();
        let p_neg = booster.predict_proba(&negative).unwrap();

        assert!((0.0..=1.0).contains(&p_pos));
        assert!((0.0..=1.0).contains(&p_neg));
        assert!(p_pos > p_neg);
    }
}
