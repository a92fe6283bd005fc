//! # Feed-Forward Network Classifier
//!
//! A small dense network stored as safetensors and evaluated with candle.
//!
//! ## Tensor Layout:
//! - `layers.{i}.weight`: `[out, in]`, for `i = 0, 1, ...` without gaps
//! - `layers.{i}.bias`: `[out]`
//! - `scaler.mean`, `scaler.scale`: optional `[in]` standardization
//!
//! ReLU sits between layers; the last layer's outputs are the class logits
//! and the predicted class is the position of the largest one.

use super::scaler::StandardScaler;
use super::{check_input, ClassIndex, Classifier, ModelFormat};
use crate::device::device_name;
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureVector;
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::Linear;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub struct NetworkClassifier {
    layers: Vec<Linear>,
    scaler: Option<StandardScaler>,
    input_dim: usize,
    num_classes: usize,
    device: Device,
}

impl NetworkClassifier {
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        let tensors = candle_core::safetensors::load(path, &device)
            .with_context(|| format!("failed to read safetensors file {}", path.display()))?;
        let network = Self::from_tensors(tensors, device)
            .with_context(|| format!("invalid network weights in {}", path.display()))?;
        info!(
            path = %path.display(),
            layers = network.layers.len(),
            input_dim = network.input_dim,
            classes = network.num_classes,
            device = device_name(&network.device),
            "network classifier loaded"
        );
        Ok(network)
    }

    pub fn from_tensors(mut tensors: HashMap<String, Tensor>, device: Device) -> Result<Self> {
        let mut layers = Vec::new();
        let mut input_dim = None;
        let mut prev_out: Option<usize> = None;

        for i in 0.. {
            let Some(weight) = tensors.remove(&format!("layers.{}.weight", i)) else {
                break;
            };
            let bias = tensors
                .remove(&format!("layers.{}.bias", i))
                .ok_or_else(|| anyhow!("layer {} has a weight but no bias", i))?;

            let weight = weight.to_dtype(DType::F32)?;
            let bias = bias.to_dtype(DType::F32)?;
            let (out_dim, in_dim) = weight.dims2().context(format!("layer {} weight", i))?;
            let bias_dim = bias.dims1().context(format!("layer {} bias", i))?;
            if bias_dim != out_dim {
                return Err(anyhow!(
                    "layer {} bias has {} entries for {} outputs",
                    i,
                    bias_dim,
                    out_dim
                ));
            }
            if let Some(prev) = prev_out {
                if prev != in_dim {
                    return Err(anyhow!(
                        "layer {} expects {} inputs but the previous layer has {} outputs",
                        i,
                        in_dim,
                        prev
                    ));
                }
            }

            input_dim.get_or_insert(in_dim);
            prev_out = Some(out_dim);
            layers.push(Linear::new(weight, Some(bias)));
        }

        let (Some(input_dim), Some(num_classes)) = (input_dim, prev_out) else {
            return Err(anyhow!("no layers.0.weight tensor found"));
        };

        let scaler = match (tensors.remove("scaler.mean"), tensors.remove("scaler.scale")) {
            (Some(mean), Some(scale)) => {
                let scaler = StandardScaler::new(
                    mean.to_dtype(DType::F32)?.to_vec1::<f32>()?,
                    scale.to_dtype(DType::F32)?.to_vec1::<f32>()?,
                )?;
                if scaler.len() != input_dim {
                    return Err(anyhow!(
                        "scaler covers {} features but the network expects {}",
                        scaler.len(),
                        input_dim
                    ));
                }
                Some(scaler)
            }
            (None, None) => None,
            _ => return Err(anyhow!("scaler.mean and scaler.scale must be given together")),
        };

        Ok(Self {
            layers,
            scaler,
            input_dim,
            num_classes,
            device,
        })
    }

    fn logits(&self, x: Vec<f32>) -> candle_core::Result<Tensor> {
        let mut xs = Tensor::from_vec(x, (1, self.input_dim), &self.device)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i < last {
                xs = xs.relu()?;
            }
        }
        xs.squeeze(0)
    }
}

impl Classifier for NetworkClassifier {
    fn format(&self) -> ModelFormat {
        ModelFormat::Safetensors
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn device(&self) -> &'static str {
        device_name(&self.device)
    }

    fn predict(&self, features: &FeatureVector) -> PipelineResult<ClassIndex> {
        check_input(self.input_dim, features)?;

        let x = match &self.scaler {
            Some(scaler) => scaler.transform(features.as_slice()),
            None => features.as_slice().to_vec(),
        };

        let index = self
            .logits(x)
            .and_then(|logits| logits.argmax(0)?.to_scalar::<u32>())
            .map_err(|e| PipelineError::ModelInference(e.to_string()))?;
        Ok(ClassIndex(index as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One linear layer where output `c` copies input feature `c`.
    fn identity_layer(classes: usize, inputs: usize) -> HashMap<String, Tensor> {
        let mut w = vec![0.0f32; classes * inputs];
        for c in 0..classes {
            w[c * inputs + c] = 1.0;
        }
        let mut tensors = HashMap::new();
        tensors.insert(
            "layers.0.weight".to_string(),
            Tensor::from_vec(w, (classes, inputs), &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.0.bias".to_string(),
            Tensor::zeros(classes, DType::F32, &Device::Cpu).unwrap(),
        );
        tensors
    }

    fn features_with(index: usize, value: f32) -> FeatureVector {
        let mut x = vec![0.0; 40];
        x[index] = value;
        FeatureVector::new(x)
    }

    #[test]
    fn test_single_layer_argmax() {
        let net = NetworkClassifier::from_tensors(identity_layer(5, 40), Device::Cpu).unwrap();
        assert_eq!(net.input_dim(), 40);
        assert_eq!(net.num_classes(), 5);
        assert_eq!(net.predict(&features_with(3, 2.0)).unwrap(), ClassIndex(3));
        assert_eq!(net.predict(&features_with(1, 0.5)).unwrap(), ClassIndex(1));
    }

    #[test]
    fn test_relu_between_layers() {
        let mut tensors = identity_layer(5, 40);
        // Second layer flips the order of the five hidden units
        let mut w = vec![0.0f32; 25];
        for c in 0..5 {
            w[c * 5 + (4 - c)] = 1.0;
        }
        tensors.insert(
            "layers.1.weight".to_string(),
            Tensor::from_vec(w, (5, 5), &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.1.bias".to_string(),
            Tensor::from_vec(vec![0.0f32, 0.0, 0.1, 0.0, 0.0], 5, &Device::Cpu).unwrap(),
        );
        let net = NetworkClassifier::from_tensors(tensors, Device::Cpu).unwrap();

        assert_eq!(net.predict(&features_with(0, 1.0)).unwrap(), ClassIndex(4));
        // Negative hidden activations are clipped, so only the bias remains
        assert_eq!(net.predict(&features_with(0, -5.0)).unwrap(), ClassIndex(2));
    }

    #[test]
    fn test_scaler_tensors() {
        let mut tensors = identity_layer(5, 40);
        let mut mean = vec![0.0f32; 40];
        mean[4] = 100.0;
        tensors.insert(
            "scaler.mean".to_string(),
            Tensor::from_vec(mean, 40, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "scaler.scale".to_string(),
            Tensor::ones(40, DType::F32, &Device::Cpu).unwrap(),
        );
        let net = NetworkClassifier::from_tensors(tensors, Device::Cpu).unwrap();
        // Feature 4 is far below its mean, feature 2 wins
        let mut x = vec![0.0; 40];
        x[4] = 50.0;
        x[2] = 0.1;
        assert_eq!(net.predict(&FeatureVector::new(x)).unwrap(), ClassIndex(2));
    }

    #[test]
    fn test_rejects_inconsistent_weights() {
        assert!(NetworkClassifier::from_tensors(HashMap::new(), Device::Cpu).is_err());

        let mut tensors = identity_layer(5, 40);
        tensors.insert(
            "layers.1.weight".to_string(),
            Tensor::zeros((5, 7), DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "layers.1.bias".to_string(),
            Tensor::zeros(5, DType::F32, &Device::Cpu).unwrap(),
        );
        assert!(NetworkClassifier::from_tensors(tensors, Device::Cpu).is_err());

        let mut tensors = identity_layer(5, 40);
        tensors.remove("layers.0.bias");
        assert!(NetworkClassifier::from_tensors(tensors, Device::Cpu).is_err());
    }

    #[test]
    fn test_wrong_input_length() {
        let net = NetworkClassifier::from_tensors(identity_layer(5, 40), Device::Cpu).unwrap();
        let err = net.predict(&FeatureVector::new(vec![1.0; 20])).unwrap_err();
        assert!(matches!(err, PipelineError::ModelInference(_)));
    }

    #[test]
    fn test_safetensors_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        candle_core::safetensors::save(&identity_layer(5, 40), &path).unwrap();

        let net = NetworkClassifier::load(&path, Device::Cpu).unwrap();
        assert_eq!(net.predict(&features_with(4, 1.0)).unwrap(), ClassIndex(4));
    }
}
