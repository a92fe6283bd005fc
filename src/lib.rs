//! # Infant Cry Diagnosis
//!
//! Turns a short recording of a crying infant into one of five likely causes:
//! discomfort, tiredness, hunger, belly pain or burping.
//!
//! ## Pipeline:
//! 1. **audio**: decode the upload (any supported codec) into a canonical 16-bit PCM WAV
//! 2. **features**: reduce the waveform to 40 time-averaged MFCCs
//! 3. **classifier**: run the pre-trained model and map its class index to a label
//!
//! [`pipeline::DiagnosisPipeline`] owns one instance of each stage and is the
//! only thing the HTTP layer talks to.
//!
//! ## Service Modules:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared application state and request metrics
//! - **health**: health check and metrics endpoints
//! - **middleware**: request ids, request logging and per-route metrics
//! - **handlers**: the diagnose, labels and config endpoints
//! - **error**: pipeline errors and their HTTP rendering

pub mod audio;
pub mod classifier;
pub mod config;
pub mod device;
pub mod error;
pub mod features;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod pipeline;
pub mod state;

pub use classifier::{Diagnosis, LabelPolicy};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{DiagnosisPipeline, DiagnosisReport};
