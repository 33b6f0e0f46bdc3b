//! Prediction handler

use axum::{extract::State, Json};
use std::borrow::Cow;

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::{AppState, AppResult};
use crate::model::{PredictionResult, FEATURE_COUNT};

#[derive(Debug, Deserialize, Validate)]
pub struct PredictRequest {
    #[validate(custom(function = "exact_feature_count"))]
    pub features: Vec<f64>,
}

fn exact_feature_count(features: &[f64]) -> Result<(), ValidationError> {
    if features.len() == FEATURE_COUNT {
        return Ok(());
    }
    let mut err = ValidationError::new("length");
    err.message = Some(Cow::Owned(format!("Exactly {} features required", FEATURE_COUNT)));
    Err(err)
}

/// Score one feature vector
pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> AppResult<Json<PredictionResult>> {
    req.validate()?;

    let predictor = state.predictor.clone();
    let result = tokio::task::spawn_blocking(move || predictor.predict(&req.features)).await??;

    tracing::debug!(
        "probability={:.4} threshold_met={}",
        result.probability,
        result.threshold_met
    );

    Ok(Json(result.rounded()))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::{Request, StatusCode}};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::{create_router, config::Config, AppError};
    use crate::model::predictor::tests::write_artifacts;

    async fn post_predict(state: AppState, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn state_with_model(dir: &std::path::Path) -> AppState {
        let (model_path, scaler_path) = write_artifacts(dir);
        AppState::new(Config {
            model_path,
            scaler_path,
            ..Config::default()
        })
    }

    #[test]
    fn test_request_validation() {
        let ok = PredictRequest { features: vec![0.0; FEATURE_COUNT] };
        assert!(ok.validate().is_ok());

        let short = PredictRequest { features: vec![0.0; FEATURE_COUNT - 1] };
        let err = AppError::from(short.validate().unwrap_err());
        assert!(matches!(err, AppError::InvalidInput(msg) if msg == "Exactly 28 features required"));
    }

    #[tokio::test]
    async fn test_wrong_length_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_model(dir.path());

        for len in [0usize, 27, 29] {
            let (status, body) = post_predict(state.clone(), json!({"features": vec![0.0; len]})).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["detail"], "Exactly 28 features required");
        }
    }

    #[tokio::test]
    async fn test_valid_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_model(dir.path());

        let (status, body) = post_predict(state.clone(), json!({"features": vec![0.0; 28]})).await;
        assert_eq!(status, StatusCode::OK);

        let probability = body["probability"].as_f64().unwrap();
        let edge = body["edge"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&probability));
        assert!((edge - (probability - 0.5)).abs() < 1e-9);
        assert_eq!(body["threshold_met"].as_bool().unwrap(), probability > 0.745);

        // Identical input, identical output
        let (_, again) = post_predict(state, json!({"features": vec![0.0; 28]})).await;
        assert_eq!(again, body);
    }

    #[tokio::test]
    async fn test_threshold_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = state_with_model(dir.path()).config;
        config.threshold = 0.1;
        let state = AppState::new(config);

        let (status, body) = post_predict(state, json!({"features": vec![0.0; 28]})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["threshold_met"], true);
    }

    #[tokio::test]
    async fn test_missing_model_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(Config {
            model_path: dir.path().join("model.txt"),
            scaler_path: dir.path().join("scaler.json"),
            ..Config::default()
        });

        let (status, body) = post_predict(state, json!({"features": vec![0.0; 28]})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("model.txt"));
    }

    #[tokio::test]
    async fn test_corrupt_scaler_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_model(dir.path());
        std::fs::write(&state.config.scaler_path, "{\"mean\": [0.0], \"scale\": [1.0]}").unwrap();

        let (status, body) = post_predict(state, json!({"features": vec![0.0; 28]})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("feature count mismatch"));
    }
}
