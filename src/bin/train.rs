//! Gap-up model trainer
//!
//! One-shot batch run: CSV in, booster + scaler out, both uploaded to the
//! bucket the server reads from.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gapper_predictor::config::DEFAULT_BUCKET;
use gapper_predictor::training::{self, Dataset, TrainParams, MODEL_KEY, SCALER_KEY};
use gapper_predictor::{artifacts, logging};

#[derive(Debug, Parser)]
#[command(name = "gapper-train", about = "Train and upload the gap-up booster and scaler")]
struct Args {
    /// Labeled CSV with columns f0..f27 and target
    dataset: PathBuf,

    /// Directory receiving models/ and scalers/
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Destination bucket
    #[arg(long, env = "MODEL_BUCKET", default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Keep artifacts local
    #[arg(long)]
    no_upload: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init("gapper_predictor=info,gapper_train=info");

    let args = Args::parse();

    let dataset = Dataset::from_path(&args.dataset)
        .with_context(|| format!("loading {}", args.dataset.display()))?;
    tracing::info!("Loaded {} rows from {}", dataset.len(), args.dataset.display());

    let out_dir = args.out_dir.clone();
    let (model_path, scaler_path) = tokio::task::spawn_blocking(move || {
        let trained = training::train(&dataset, &TrainParams::default())?;
        trained.save(&out_dir)
    })
    .await
    .context("training task panicked")??;

    if args.no_upload {
        tracing::info!("Upload skipped (--no-upload)");
        return Ok(());
    }

    let store = artifacts::gcs_store(&args.bucket)?;
    artifacts::upload(store.as_ref(), &model_path, MODEL_KEY).await?;
    artifacts::upload(store.as_ref(), &scaler_path, SCALER_KEY).await?;

    tracing::info!("Model uploaded to gs://{}/", args.bucket);
    Ok(())
}
