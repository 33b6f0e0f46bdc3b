//! Artifact Store - model and scaler blobs
//!
//! Startup refresh copies the latest model under the model prefix and the
//! fixed-key scaler into their local paths. `gapper-train` uses the same
//! module to upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),
    #[error("no model artifacts under prefix '{0}'")]
    NoModels(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a refresh actually downloaded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Key of the model that was downloaded
    pub model_key: Option<String>,
    pub scaler_downloaded: bool,
}

/// Connect to the configured GCS bucket (credentials from the environment)
pub fn gcs_store(bucket: &str) -> Result<Arc<dyn ObjectStore>, ArtifactError> {
    let store = GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(bucket)
        .build()?;
    Ok(Arc::new(store))
}

fn prefix_path(prefix: &str) -> ObjectPath {
    ObjectPath::from(prefix.trim_end_matches('/'))
}

/// Most recently modified object under `prefix`; ties go to the larger key
pub async fn latest_object(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Option<ObjectMeta>, ArtifactError> {
    let prefix = prefix_path(prefix);
    let objects: Vec<ObjectMeta> = store.list(Some(&prefix)).try_collect().await?;

    Ok(objects
        .into_iter()
        .max_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.location.as_ref().cmp(b.location.as_ref()))
        }))
}

/// Whether `key` exists in the store
pub async fn exists(store: &dyn ObjectStore, key: &str) -> Result<bool, ArtifactError> {
    match store.head(&ObjectPath::from(key)).await {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Download `location` to `dest`, replacing it atomically
pub async fn download(
    store: &dyn ObjectStore,
    location: &ObjectPath,
    dest: &Path,
) -> Result<u64, ArtifactError> {
    let bytes = store.get(location).await?.bytes().await?;

    let io_err = |source: std::io::Error| ArtifactError::Io {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp = dest.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, dest).await.map_err(io_err)?;

    tracing::info!(
        "Downloaded {} -> {} ({} bytes, sha256 {})",
        location,
        dest.display(),
        bytes.len(),
        sha256_hex(&bytes)
    );

    Ok(bytes.len() as u64)
}

/// Upload a local file under `key`
pub async fn upload(store: &dyn ObjectStore, src: &Path, key: &str) -> Result<(), ArtifactError> {
    let bytes = tokio::fs::read(src).await.map_err(|source| ArtifactError::Io {
        path: src.to_path_buf(),
        source,
    })?;

    let digest = sha256_hex(&bytes);
    let len = bytes.len();
    store
        .put(&ObjectPath::from(key), PutPayload::from(bytes))
        .await?;

    tracing::info!("Uploaded {} -> {} ({} bytes, sha256 {})", src.display(), key, len, digest);
    Ok(())
}

/// Populate the local model cache from the store.
///
/// The model is fetched first; an empty model prefix is an error and leaves
/// both local files untouched. A missing scaler key is skipped.
pub async fn refresh(store: &dyn ObjectStore, config: &Config) -> Result<RefreshReport, ArtifactError> {
    let mut report = RefreshReport::default();

    let latest = latest_object(store, &config.model_prefix)
        .await?
        .ok_or_else(|| ArtifactError::NoModels(config.model_prefix.clone()))?;

    tracing::info!("Latest model: {} (updated {})", latest.location, latest.last_modified);
    download(store, &latest.location, &config.model_path).await?;
    report.model_key = Some(latest.location.to_string());

    if exists(store, &config.scaler_key).await? {
        download(store, &ObjectPath::from(config.scaler_key.as_str()), &config.scaler_path).await?;
        report.scaler_downloaded = true;
    } else {
        tracing::warn!("Scaler {} not found in bucket, keeping local copy", config.scaler_key);
    }

    Ok(report)
}

/// Startup refresh for the server. Never fails: a store that could not be
/// reached or a refresh error is logged and the local cache is served as is.
/// The predictor cache is invalidated either way.
pub async fn startup_refresh(store: Result<Arc<dyn ObjectStore>, ArtifactError>, state: &AppState) {
    let result = match store {
        Ok(store) => refresh(store.as_ref(), &state.config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(report) => tracing::info!(
            "Artifacts refreshed: model={:?} scaler={}",
            report.model_key,
            report.scaler_downloaded
        ),
        Err(e) => tracing::warn!("Artifact refresh failed, serving local cache: {}", e),
    }

    state.predictor.invalidate();

    if !state.predictor.model_present() {
        tracing::warn!(
            "No model at {}; /predict will fail until one is present",
            state.config.model_path.display()
        );
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
