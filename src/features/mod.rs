//! # Feature Extraction
//!
//! Reduces a canonical waveform of any length to a fixed-size vector of mean
//! Mel-frequency cepstral coefficients. Averaging over time is what lets one
//! static classifier handle recordings of any duration.
//!
//! ## Default Parameters:
//! - **n_mfcc**: 40 coefficients (the classifier's input size)
//! - **n_fft**: 2048 samples, periodic Hann window
//! - **hop_length**: 512 samples, centered frames
//! - **n_mels**: 128 Slaney mel bands from 0 Hz to Nyquist
//! - **top_db**: 80 dB dynamic range below the loudest cell
//!
//! These follow the widely used librosa defaults, so feature vectors line up
//! with models trained on librosa-extracted features.

pub mod mel;
pub mod mfcc;

pub use mfcc::MfccExtractor;

use crate::audio::waveform::read_mono;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Length of every feature vector the service produces.
pub const FEATURE_DIM: usize = 40;

/// MFCC parameters.
///
/// Only the analysis settings are tunable; `n_mfcc` must stay at [`FEATURE_DIM`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfccConfig {
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub fmin: f64,
    /// Upper edge of the mel bank; `None` means the Nyquist frequency
    pub fmax: Option<f64>,
    /// Dynamic range clip in dB; `None` disables clipping
    pub top_db: Option<f64>,
    /// Pad by half a window on each side so frames are centered on their hop
    pub center: bool,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_mfcc: FEATURE_DIM,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            top_db: Some(80.0),
            center: true,
        }
    }
}

impl MfccConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_mfcc != FEATURE_DIM {
            return Err(anyhow::anyhow!(
                "n_mfcc must be {} (got {})",
                FEATURE_DIM,
                self.n_mfcc
            ));
        }
        if self.n_fft == 0 || self.hop_length == 0 {
            return Err(anyhow::anyhow!("FFT size and hop length must be greater than 0"));
        }
        if self.n_mels == 0 {
            return Err(anyhow::anyhow!("n_mels must be greater than 0"));
        }
        if self.n_mfcc > self.n_mels {
            return Err(anyhow::anyhow!(
                "n_mfcc ({}) cannot exceed n_mels ({})",
                self.n_mfcc,
                self.n_mels
            ));
        }
        if self.fmin < 0.0 {
            return Err(anyhow::anyhow!("fmin cannot be negative"));
        }
        if let Some(fmax) = self.fmax {
            if fmax <= self.fmin {
                return Err(anyhow::anyhow!("fmax ({}) must be above fmin ({})", fmax, self.fmin));
            }
        }
        if matches!(self.top_db, Some(db) if db < 0.0) {
            return Err(anyhow::anyhow!("top_db cannot be negative"));
        }
        Ok(())
    }
}

/// Time-averaged MFCCs of one recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl MfccExtractor {
    /// Mean MFCC vector of mono samples.
    ///
    /// Fails only on empty input or non-finite samples; silence is fine.
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> PipelineResult<FeatureVector> {
        if samples.is_empty() {
            return Err(PipelineError::FeatureExtraction(
                "waveform contains no samples".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(PipelineError::FeatureExtraction(
                "waveform has a sample rate of 0".to_string(),
            ));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(PipelineError::FeatureExtraction(
                "waveform contains NaN or infinite samples".to_string(),
            ));
        }

        Ok(FeatureVector(self.mean_mfcc(samples, sample_rate)))
    }

    /// Read a waveform file and compute its feature vector.
    pub fn extract_file(&self, path: &Path) -> PipelineResult<FeatureVector> {
        let audio = read_mono(path)?;
        debug!(
            path = %path.display(),
            sample_rate = audio.sample_rate,
            duration_s = audio.duration_seconds(),
            "extracting features"
        );
        self.extract(&audio.samples, audio.sample_rate)
    }
}
