//! Ownership and readiness of the loaded classifier.
//!
//! The model takes a while to fetch and optimize, so it is loaded in the background while the
//! server is already answering requests. Everything that needs the model asks the
//! `ModelHandle` first and backs off while it is not ready.
use std::sync::{Arc, OnceLock};

use tokio::task::JoinHandle;

use crate::nn::{Classifier, MobileNetModel, ModelConfig};

pub type SharedClassifier = Arc<dyn Classifier>;

#[derive(Default)]
pub struct ModelHandle {
    model: OnceLock<SharedClassifier>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self {
            model: OnceLock::new(),
        }
    }

    /// Create a handle that is ready right away.
    pub fn with_model(model: SharedClassifier) -> Self {
        let handle = Self::new();
        handle.set(model);
        handle
    }

    pub fn is_ready(&self) -> bool {
        self.model.get().is_some()
    }

    /// The loaded model, or `None` while it is still loading.
    pub fn get(&self) -> Option<SharedClassifier> {
        self.model.get().cloned()
    }

    /// Store the loaded model. Returns `false` if a model was already set.
    pub fn set(&self, model: SharedClassifier) -> bool {
        self.model.set(model).is_ok()
    }
}

/// Load the model in the background and mark the handle ready once done.
pub fn spawn_model_loader(handle: Arc<ModelHandle>, config: ModelConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("Loading model...");
        match MobileNetModel::load(&config).await {
            Ok(model) => {
                if !handle.set(Arc::new(model)) {
                    log::warn!("Model was already loaded, discarding second instance");
                }
                log::info!("Model loaded, ready to classify");
            }
            Err(e) => log::error!("Failed to load model: {e:#}"),
        }
    })
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use common::prediction::Prediction;
    use image::RgbImage;

    use super::*;

    struct Constant;

    impl Classifier for Constant {
        fn classify(&self, _image: &RgbImage) -> Result<Vec<Prediction>> {
            Ok(vec![Prediction::new("teapot", 0.9)])
        }
    }

    #[test]
    fn test_not_ready_until_set() -> Result<()> {
        let handle = ModelHandle::new();
        assert!(!handle.is_ready());
        assert!(handle.get().is_none());

        assert!(handle.set(Arc::new(Constant)));
        assert!(handle.is_ready());

        let predictions = handle
            .get()
            .expect("model set")
            .classify(&RgbImage::new(1, 1))?;
        assert_eq!(predictions[0].class_name, "teapot");

        Ok(())
    }

    #[test]
    fn test_set_only_once() {
        let handle = ModelHandle::with_model(Arc::new(Constant));
        assert!(!handle.set(Arc::new(Constant)));
    }

    #[tokio::test]
    async fn test_failed_load_stays_not_ready() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = ModelConfig {
            model_path: Some(dir.path().join("missing.onnx")),
            labels_path: Some(dir.path().join("missing.txt")),
            cache_dir: dir.path().to_owned(),
            top_k: 3,
        };

        let handle = Arc::new(ModelHandle::new());
        spawn_model_loader(Arc::clone(&handle), config).await?;
        assert!(!handle.is_ready());
        assert!(handle.get().is_none());

        Ok(())
    }
}
