//! Image classification with a pretrained MobileNetV2 network.
//!
//! The network itself is an external ONNX file executed by `tract`. This module only prepares
//! the input tensor, turns the raw logits into ranked predictions and takes care of fetching the
//! model and label files.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use common::prediction::Prediction;
use image::RgbImage;
use lazy_static::lazy_static;
use ndarray::{Array1, ArrayView1};
use reqwest::Client;
use tract_onnx::prelude::*;

use crate::utils::download_file;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/classification/mobilenet/model/mobilenetv2-7.onnx";
const LABELS_URL: &str =
    "https://raw.githubusercontent.com/onnx/models/main/validated/vision/classification/synset.txt";
const MODEL_FILENAME: &str = "mobilenetv2-7.onnx";
const LABELS_FILENAME: &str = "synset.txt";

/// Side length of the square network input.
const INPUT_SIZE: u32 = 224;

/// Normalization constants of the ImageNet training set.
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Number of predictions returned per image unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 3;

lazy_static! {
    /// Directory where downloaded model files are kept.
    pub static ref DEFAULT_CACHE_DIR: PathBuf = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("classify_cam");
}

/// Anything that maps an image to a ranked list of predictions.
pub trait Classifier: Send + Sync {
    /// Classify an image. The result is sorted by descending probability.
    fn classify(&self, image: &RgbImage) -> Result<Vec<Prediction>>;
}

/// Where to find the model and how many predictions to report.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// Explicit path to an `.onnx` file. Downloaded into `cache_dir` if not set.
    pub model_path: Option<PathBuf>,
    /// Explicit path to a labels file. Downloaded into `cache_dir` if not set.
    pub labels_path: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub top_k: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            cache_dir: DEFAULT_CACHE_DIR.clone(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

pub struct MobileNetModel {
    model: NnModel,
    labels: Vec<String>,
    top_k: usize,
}

impl MobileNetModel {
    /// Resolve the model files, downloading them if necessary, and build the runnable model.
    pub async fn load(config: &ModelConfig) -> Result<Self> {
        let client = Client::new();
        let model_path = match &config.model_path {
            Some(path) => path.clone(),
            None => fetch_cached(&client, MODEL_URL, &config.cache_dir, MODEL_FILENAME).await?,
        };
        let labels_path = match &config.labels_path {
            Some(path) => path.clone(),
            None => fetch_cached(&client, LABELS_URL, &config.cache_dir, LABELS_FILENAME).await?,
        };

        let top_k = config.top_k;
        tokio::task::spawn_blocking(move || Self::from_files(&model_path, &labels_path, top_k))
            .await?
    }

    /// Build the model from files on disk. Blocks while the network is optimized.
    pub fn from_files(model_path: &Path, labels_path: &Path, top_k: usize) -> Result<Self> {
        let labels = std::fs::read_to_string(labels_path)
            .with_context(|| format!("failed to read labels from {}", labels_path.display()))?;
        let labels = parse_labels(&labels);

        log::info!(
            "Loading model {} with {} labels",
            model_path.display(),
            labels.len()
        );
        let model = get_mobilenet_model(model_path)?;

        Ok(Self {
            model,
            labels,
            top_k,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        preproc(input)
    }

    fn postproc(&self, raw_nn_out: TVec<TValue>) -> Result<Vec<Prediction>> {
        let logits: Vec<f32> = raw_nn_out
            .first()
            .context("model produced no outputs")?
            .to_array_view::<f32>()?
            .iter()
            .cloned()
            .collect();

        Ok(rank_predictions(&logits, &self.labels, self.top_k))
    }
}

impl Classifier for MobileNetModel {
    fn classify(&self, image: &RgbImage) -> Result<Vec<Prediction>> {
        let valid_input = tvec!(self.preproc(image).into());
        let raw_nn_out = self.model.run(valid_input)?;
        self.postproc(raw_nn_out)
    }
}

fn get_mobilenet_model(path: &Path) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Return the path of `filename` in `cache_dir`, downloading it from `url` first if missing.
async fn fetch_cached(
    client: &Client,
    url: &str,
    cache_dir: &Path,
    filename: &str,
) -> Result<PathBuf> {
    let filepath = cache_dir.join(filename);
    if filepath.exists() {
        log::debug!("Using cached {}", filepath.display());
        return Ok(filepath);
    }

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;
    log::info!("Downloading {} to {}", url, filepath.display());

    // Download next to the target first so an interrupted download is not picked up later.
    let partial = cache_dir.join(format!("{filename}.part"));
    download_file(client, url, &partial).await?;
    std::fs::rename(&partial, &filepath)?;

    Ok(filepath)
}

/// Resize and normalize an image into a `1x3xHxW` tensor.
pub fn preproc(input: &RgbImage) -> Tensor {
    let resized: RgbImage = image::imageops::resize(
        input,
        INPUT_SIZE,
        INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );

    tract_ndarray::Array4::from_shape_fn(
        (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        |(_, c, y, x)| (resized[(x as _, y as _)][c] as f32 / 255.0 - MEAN[c]) / STD[c],
    )
    .into()
}

/// Parse a labels file with one class per line.
///
/// Lines may start with an ImageNet synset id like `n01440764`, which is dropped.
pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((id, name)) if is_synset_id(id) => name.trim().to_owned(),
            _ => line.to_owned(),
        })
        .collect()
}

fn is_synset_id(token: &str) -> bool {
    token.len() == 9
        && token.starts_with('n')
        && token[1..].bytes().all(|b| b.is_ascii_digit())
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Array1<f32> {
    let logits = ArrayView1::from(logits);
    let max = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Turn raw logits into the `top_k` most probable predictions.
pub fn rank_predictions(logits: &[f32], labels: &[String], top_k: usize) -> Vec<Prediction> {
    if logits.is_empty() || top_k == 0 {
        return vec![];
    }

    let probabilities = softmax(logits);
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().cloned().enumerate().collect();
    // NaN compares as smallest so that it ends up last
    ranked.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b.1.total_cmp(&a.1),
    });

    ranked
        .into_iter()
        .take(top_k)
        .map(|(idx, probability)| {
            let class_name = labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("class {idx}"));
            Prediction::new(class_name, probability)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use image::Rgb;

    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0]);
        assert!((probabilities.sum() - 1.0).abs() < 1e-6);
        assert!(probabilities[2] > probabilities[1] && probabilities[1] > probabilities[0]);
    }

    #[test]
    fn test_softmax_large_logits() {
        let probabilities = softmax(&[1000.0, 1000.0]);
        assert!((probabilities[0] - 0.5).abs() < 1e-6);
        assert!((probabilities[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rank_predictions() {
        let predictions = rank_predictions(
            &[0.1, 4.0, 2.0, -1.0],
            &labels(&["tench", "goldfish", "great white shark", "tiger shark"]),
            2,
        );

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].class_name, "goldfish");
        assert_eq!(predictions[1].class_name, "great white shark");
        assert!(predictions[0].probability > predictions[1].probability);
        assert!(predictions[0].probability <= 1.0);
    }

    #[test]
    fn test_rank_predictions_edge_cases() {
        assert!(rank_predictions(&[], &[], 3).is_empty());
        assert!(rank_predictions(&[1.0, 2.0], &labels(&["a", "b"]), 0).is_empty());

        // More requested than available
        let predictions = rank_predictions(&[1.0, 2.0], &labels(&["a", "b"]), 5);
        assert_eq!(predictions.len(), 2);

        // Missing labels
        let predictions = rank_predictions(&[0.0, 5.0], &labels(&["a"]), 1);
        assert_eq!(predictions[0].class_name, "class 1");
    }

    #[test]
    fn test_parse_labels() {
        let text = "n01440764 tench, Tinca tinca\n\nn01443537 goldfish, Carassius auratus\r\nmonitor\nnotanid label\n";
        assert_eq!(
            parse_labels(text),
            labels(&[
                "tench, Tinca tinca",
                "goldfish, Carassius auratus",
                "monitor",
                "notanid label"
            ])
        );
    }

    #[test]
    fn test_preproc_shape_and_normalization() -> Result<()> {
        let image = RgbImage::from_pixel(64, 48, Rgb([255, 0, 128]));
        let tensor = preproc(&image);

        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
        let view = tensor.to_array_view::<f32>()?;
        let red = view[&[0, 0, 100, 100][..]];
        let green = view[&[0, 1, 100, 100][..]];
        // One intensity level of slack for the resize filter
        assert!((red - (1.0 - 0.485) / 0.229).abs() < 0.02);
        assert!((green - (0.0 - 0.456) / 0.224).abs() < 0.02);

        Ok(())
    }
}
