//! # Configuration Management
//!
//! Loads the service configuration from several sources, highest priority first:
//! 1. `HOST` / `PORT` environment variables (deployment platforms set these)
//! 2. Environment variables with the `APP` prefix, `__` between sections
//!    (`APP_MODEL__PATH=/srv/models/cry.json`, `APP_LABELS__POLICY=strict`)
//! 3. An optional `config.toml` in the working directory
//! 4. The defaults from [`AppConfig::default`]
//!
//! A double underscore is used as the separator because several keys
//! (`n_mfcc`, `slot_mode`, ...) contain single underscores.

use crate::audio::decoder::DEFAULT_MAX_DURATION;
use crate::audio::store::SlotMode;
use crate::classifier::labels::LabelPolicy;
use crate::device::DevicePreference;
use crate::features::MfccConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub features: MfccConfig,
    pub labels: LabelsConfig,
    pub limits: LimitsConfig,
}

/// Where the HTTP adapter listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// The pre-trained classifier artifact.
///
/// ## Fields:
/// - `path`: model file loaded once at startup
/// - `format`: `auto`, `forest` or `safetensors`; `auto` looks at the file extension
/// - `device`: candle device for network models (`auto`, `cpu`, `cuda`, `metal`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub format: String,
    pub device: String,
}

/// Filesystem hand-off between the normalizer and the feature extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for staged uploads and canonical waveforms
    pub audio_dir: String,
    /// `per_request` gives every run its own files, `shared` reuses one slot
    pub slot_mode: SlotMode,
    /// Keep canonical waveforms on disk after classification
    pub retain_waveforms: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    /// What to do with class indices outside the known five
    pub policy: LabelPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
    /// Longest accepted recording once decoded, in seconds
    pub max_duration_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            model: ModelConfig {
                path: "models/infant_cry_classifier.json".to_string(),
                format: "auto".to_string(),
                device: "cpu".to_string(),
            },
            storage: StorageConfig {
                audio_dir: "audio_files".to_string(),
                slot_mode: SlotMode::PerRequest,
                retain_waveforms: false,
            },
            features: MfccConfig::default(),
            labels: LabelsConfig {
                policy: LabelPolicy::Strict,
            },
            limits: LimitsConfig {
                max_upload_bytes: 20 * 1024 * 1024,
                max_duration_secs: DEFAULT_MAX_DURATION.as_secs(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("configuration has an unexpected shape")?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.path.trim().is_empty() {
            return Err(anyhow::anyhow!("Model path must be set"));
        }

        if !matches!(self.model.format.as_str(), "auto" | "forest" | "safetensors") {
            return Err(anyhow::anyhow!(
                "Unknown model format '{}' (expected auto, forest or safetensors)",
                self.model.format
            ));
        }

        self.model
            .device
            .parse::<DevicePreference>()
            .context("invalid model.device")?;

        if self.storage.audio_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Audio directory must be set"));
        }

        if self.limits.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Upload limit must be greater than 0"));
        }

        if self.limits.max_duration_secs == 0 {
            return Err(anyhow::anyhow!("Recording duration limit must be greater than 0"));
        }

        self.features.validate()?;
        Ok(())
    }

    pub fn audio_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.audio_dir)
    }
}
