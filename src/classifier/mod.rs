//! # Classifier
//!
//! Maps a feature vector to a class index and the class index to a diagnosis.
//!
//! ## Components:
//! - **Classifier**: the prediction capability, one implementation per model format
//! - **forest**: tree ensembles exported to JSON
//! - **network**: dense networks stored as safetensors, run with candle
//! - **labels**: class index → diagnosis table and the unknown-index policy
//! - **scaler**: optional feature standardization shared by both formats
//!
//! Models are loaded once at startup and are read-only afterwards, so a single
//! instance is shared across all requests without locking.

pub mod forest;
pub mod labels;
pub mod network;
pub mod scaler;

pub use forest::ForestClassifier;
pub use labels::{Diagnosis, LabelPolicy};
pub use network::NetworkClassifier;

use crate::config::ModelConfig;
use crate::device::{select_device, DevicePreference};
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureVector;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Integer output of a model, before label mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassIndex(pub i64);

impl fmt::Display for ClassIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk model formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Forest,
    Safetensors,
}

impl ModelFormat {
    /// Resolve `model.format`; `auto` goes by the file extension.
    pub fn resolve(format: &str, path: &Path) -> Result<Self> {
        match format.trim().to_lowercase().as_str() {
            "forest" => Ok(ModelFormat::Forest),
            "safetensors" => Ok(ModelFormat::Safetensors),
            "auto" => match path.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ModelFormat::Forest),
                Some(ext) if ext.eq_ignore_ascii_case("safetensors") => {
                    Ok(ModelFormat::Safetensors)
                }
                _ => Err(anyhow!(
                    "cannot infer model format from {}; set model.format explicitly",
                    path.display()
                )),
            },
            other => Err(anyhow!("Unknown model format: {}", other)),
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::Forest => write!(f, "forest"),
            ModelFormat::Safetensors => write!(f, "safetensors"),
        }
    }
}

/// A pre-trained model that predicts one class per feature vector.
///
/// Implementations must be deterministic: the same vector always yields the
/// same class.
pub trait Classifier: Send + Sync {
    fn format(&self) -> ModelFormat;

    /// Feature vector length the model was trained on
    fn input_dim(&self) -> usize;

    fn num_classes(&self) -> usize;

    /// Where inference runs
    fn device(&self) -> &'static str {
        "cpu"
    }

    fn predict(&self, features: &FeatureVector) -> PipelineResult<ClassIndex>;
}

/// Reject vectors the model cannot take.
pub fn check_input(input_dim: usize, features: &FeatureVector) -> PipelineResult<()> {
    if features.len() != input_dim {
        return Err(PipelineError::ModelInference(format!(
            "model expects {} features, got {}",
            input_dim,
            features.len()
        )));
    }
    if !features.is_finite() {
        return Err(PipelineError::ModelInference(
            "feature vector contains NaN or infinite values".to_string(),
        ));
    }
    Ok(())
}

/// Model details reported by the health and config endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub path: String,
    pub format: ModelFormat,
    pub input_dim: usize,
    pub num_classes: usize,
    pub device: String,
}

impl ModelSummary {
    pub fn of(path: &str, classifier: &dyn Classifier) -> Self {
        Self {
            path: path.to_string(),
            format: classifier.format(),
            input_dim: classifier.input_dim(),
            num_classes: classifier.num_classes(),
            device: classifier.device().to_string(),
        }
    }
}

/// Load the configured model. Any failure here should stop startup.
pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn Classifier>> {
    let path = Path::new(&config.path);
    if !path.is_file() {
        return Err(anyhow!("model file not found: {}", path.display()));
    }

    match ModelFormat::resolve(&config.format, path)? {
        ModelFormat::Forest => Ok(Arc::new(ForestClassifier::load(path)?)),
        ModelFormat::Safetensors => {
            let preference: DevicePreference = config.device.parse()?;
            let device = select_device(preference);
            Ok(Arc::new(NetworkClassifier::load(path, device)?))
        }
    }
}
