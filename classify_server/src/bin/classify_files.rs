//! Classify image files from the command line.
//!
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use classify_server::nn::{
    Classifier, MobileNetModel, ModelConfig, DEFAULT_CACHE_DIR, DEFAULT_TOP_K,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Images to classify
    #[clap(required = true)]
    images: Vec<PathBuf>,

    /// ONNX model file, downloaded to the cache directory if not given
    #[clap(long)]
    model_path: Option<PathBuf>,

    /// Labels file with one class per line, downloaded if not given
    #[clap(long)]
    labels_path: Option<PathBuf>,

    /// Directory for downloaded model files
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Number of predictions to print per image
    #[clap(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let config = ModelConfig {
        model_path: args.model_path,
        labels_path: args.labels_path,
        cache_dir: args.cache_dir.unwrap_or_else(|| DEFAULT_CACHE_DIR.clone()),
        top_k: args.top_k,
    };
    let model = MobileNetModel::load(&config).await?;

    for path in args.images {
        let image = image::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?
            .to_rgb8();
        let predictions = model.classify(&image)?;

        println!("{}", path.display());
        match predictions.first() {
            Some(top) => println!("  {}", top.describe()),
            None => println!("  No prediction available."),
        }
        for prediction in predictions.iter().skip(1) {
            println!(
                "  also possible: {} ({}%)",
                prediction.class_name,
                prediction.percent()
            );
        }
    }

    Ok(())
}
