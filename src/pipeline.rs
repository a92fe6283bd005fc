//! # Diagnosis Pipeline
//!
//! The explicit context every request runs against: storage slots, the MFCC
//! extractor, the loaded model and the label policy. It is built once at
//! startup, never mutated afterwards and shared through `Arc`.
//!
//! ## Stages:
//! 1. [`DiagnosisPipeline::normalize`]: upload bytes → canonical waveform on disk
//! 2. [`DiagnosisPipeline::extract_features`]: canonical waveform → mean MFCC vector
//! 3. [`DiagnosisPipeline::classify`]: feature vector → class index → diagnosis
//!
//! [`DiagnosisPipeline::diagnose`] runs all three for one recording, then
//! cleans up its files. Everything is synchronous; HTTP callers run it on a
//! blocking worker.

use crate::audio::decoder::DEFAULT_MAX_DURATION;
use crate::audio::{normalize, CanonicalWaveform, WaveformSlot, WaveformStore};
use crate::classifier::{load_classifier, ClassIndex, Classifier, Diagnosis, LabelPolicy, ModelSummary};
use crate::config::AppConfig;
use crate::error::PipelineResult;
use crate::features::{FeatureVector, MfccExtractor};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Outcome of the classify stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub class_index: ClassIndex,
    pub diagnosis: Diagnosis,
}

/// Outcome of a full pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisReport {
    pub recording_id: Uuid,
    pub class_index: ClassIndex,
    pub diagnosis: Diagnosis,
    pub waveform: CanonicalWaveform,
    pub processing_time_ms: u64,
}

pub struct DiagnosisPipeline {
    store: WaveformStore,
    extractor: MfccExtractor,
    classifier: Arc<dyn Classifier>,
    policy: LabelPolicy,
    retain_waveforms: bool,
    max_duration: Duration,
    model: ModelSummary,
}

impl DiagnosisPipeline {
    /// Assemble a pipeline from already-built parts.
    ///
    /// Fails when the model's input size differs from the number of
    /// coefficients the extractor produces.
    pub fn new(
        store: WaveformStore,
        extractor: MfccExtractor,
        classifier: Arc<dyn Classifier>,
        policy: LabelPolicy,
        retain_waveforms: bool,
        model_path: &str,
    ) -> Result<Self> {
        let n_mfcc = extractor.config().n_mfcc;
        if classifier.input_dim() != n_mfcc {
            return Err(anyhow!(
                "model expects {} features but the extractor produces {} MFCCs",
                classifier.input_dim(),
                n_mfcc
            ));
        }

        let model = ModelSummary::of(model_path, classifier.as_ref());
        Ok(Self {
            store,
            extractor,
            classifier,
            policy,
            retain_waveforms,
            max_duration: DEFAULT_MAX_DURATION,
            model,
        })
    }

    /// Reject recordings that decode to more than `limit` of audio.
    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = limit;
        self
    }

    /// Build the pipeline described by the configuration, loading the model.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let store = WaveformStore::open(config.audio_dir(), config.storage.slot_mode)
            .context("failed to prepare audio directory")?;
        let classifier = load_classifier(&config.model)
            .with_context(|| format!("failed to load model {}", config.model.path))?;

        let pipeline = Self::new(
            store,
            MfccExtractor::new(config.features.clone()),
            classifier,
            config.labels.policy,
            config.storage.retain_waveforms,
            &config.model.path,
        )?
        .with_max_duration(Duration::from_secs(config.limits.max_duration_secs));

        info!(
            model = %pipeline.model.path,
            format = %pipeline.model.format,
            device = %pipeline.model.device,
            audio_dir = %pipeline.store.dir().display(),
            slot_mode = ?pipeline.store.mode(),
            policy = ?pipeline.policy,
            max_duration_secs = pipeline.max_duration.as_secs(),
            "diagnosis pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn model(&self) -> &ModelSummary {
        &self.model
    }

    pub fn policy(&self) -> LabelPolicy {
        self.policy
    }

    pub fn store(&self) -> &WaveformStore {
        &self.store
    }

    /// Decode `raw` and write it as the canonical waveform of `slot`.
    pub fn normalize(
        &self,
        raw: &[u8],
        format_hint: Option<&str>,
        slot: &WaveformSlot,
    ) -> PipelineResult<CanonicalWaveform> {
        normalize(raw, format_hint, slot, Some(self.max_duration))
    }

    pub fn extract_features(&self, waveform_path: &Path) -> PipelineResult<FeatureVector> {
        self.extractor.extract_file(waveform_path)
    }

    pub fn classify(&self, features: &FeatureVector) -> PipelineResult<Classification> {
        let class_index = self.classifier.predict(features)?;
        let diagnosis = self.policy.resolve(class_index)?;
        debug!(class_index = %class_index, label = diagnosis.label(), "recording classified");
        Ok(Classification {
            class_index,
            diagnosis,
        })
    }

    /// Run every stage for one recording.
    ///
    /// `id` names the storage slot in per-request mode. In shared mode the
    /// whole run holds the slot lock. The staged upload is always removed and
    /// the canonical waveform is removed unless waveforms are retained.
    pub fn diagnose(
        &self,
        id: Uuid,
        raw: &[u8],
        format_hint: Option<&str>,
    ) -> PipelineResult<DiagnosisReport> {
        let span = info_span!("diagnose", recording_id = %id, bytes = raw.len());
        let _entered = span.enter();
        let start = Instant::now();

        let _slot_lock = self.store.lock_shared();
        let slot = self.store.slot(id);
        let result = self.run(&slot, raw, format_hint);

        self.store.discard_upload(&slot);
        if !self.retain_waveforms {
            self.store.discard_waveform(&slot);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok((waveform, classification)) => {
                info!(
                    label = classification.diagnosis.label(),
                    class_index = %classification.class_index,
                    duration_ms = waveform.duration_ms(),
                    elapsed_ms,
                    "diagnosis complete"
                );
                Ok(DiagnosisReport {
                    recording_id: id,
                    class_index: classification.class_index,
                    diagnosis: classification.diagnosis,
                    waveform,
                    processing_time_ms: elapsed_ms,
                })
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!(kind = e.kind(), error = %e, elapsed_ms, "recording rejected");
                } else {
                    error!(kind = e.kind(), error = %e, elapsed_ms, "diagnosis failed");
                }
                Err(e)
            }
        }
    }

    fn run(
        &self,
        slot: &WaveformSlot,
        raw: &[u8],
        format_hint: Option<&str>,
    ) -> PipelineResult<(CanonicalWaveform, Classification)> {
        let waveform = self.normalize(raw, format_hint, slot)?;
        let features = self.extract_features(&waveform.path)?;
        let classification = self.classify(&features)?;
        Ok((waveform, classification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures;
    use crate::audio::SlotMode;
    use crate::classifier::ModelFormat;
    use crate::error::PipelineError;
    use crate::features::{MfccConfig, FEATURE_DIM};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always predicts the same class and counts calls.
    struct FixedClassifier {
        class: i64,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(class: i64) -> Arc<Self> {
            Arc::new(Self {
                class,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Classifier for FixedClassifier {
        fn format(&self) -> ModelFormat {
            ModelFormat::Forest
        }

        fn input_dim(&self) -> usize {
            FEATURE_DIM
        }

        fn num_classes(&self) -> usize {
            5
        }

        fn predict(&self, features: &FeatureVector) -> PipelineResult<ClassIndex> {
            crate::classifier::check_input(FEATURE_DIM, features)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClassIndex(self.class))
        }
    }

    /// Picks the largest of coefficients 1..=5, so different recordings
    /// usually land in different classes.
    struct SpectralClassifier;

    impl Classifier for SpectralClassifier {
        fn format(&self) -> ModelFormat {
            ModelFormat::Forest
        }

        fn input_dim(&self) -> usize {
            FEATURE_DIM
        }

        fn num_classes(&self) -> usize {
            5
        }

        fn predict(&self, features: &FeatureVector) -> PipelineResult<ClassIndex> {
            let x = &features.as_slice()[1..=5];
            let mut best = 0;
            for (i, v) in x.iter().enumerate() {
                if *v > x[best] {
                    best = i;
                }
            }
            Ok(ClassIndex(best as i64))
        }
    }

    fn pipeline(
        dir: &Path,
        classifier: Arc<dyn Classifier>,
        policy: LabelPolicy,
        mode: SlotMode,
    ) -> DiagnosisPipeline {
        DiagnosisPipeline::new(
            WaveformStore::open(dir, mode).unwrap(),
            MfccExtractor::new(MfccConfig::default()),
            classifier,
            policy,
            false,
            "stub",
        )
        .unwrap()
    }

    fn recording(freq: f32) -> Vec<u8> {
        let pcm = fixtures::to_pcm16(&fixtures::sine(freq, 1.0, 16000, 0.5));
        fixtures::wav_bytes_16(&pcm, 16000, 1)
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_stub_one_is_tiredness() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), FixedClassifier::new(1), LabelPolicy::Strict, SlotMode::PerRequest);

        let report = p.diagnose(Uuid::new_v4(), &recording(440.0), Some("wav")).unwrap();
        assert_eq!(report.diagnosis.label(), "tiredness");
        assert_eq!(report.class_index, ClassIndex(1));
        assert_eq!(report.waveform.sample_rate, 16000);
        assert!(dir_is_empty(dir.path()), "run must clean up its files");
    }

    #[test]
    fn test_unknown_class_per_policy() {
        let dir = tempfile::tempdir().unwrap();
        let strict = pipeline(dir.path(), FixedClassifier::new(99), LabelPolicy::Strict, SlotMode::PerRequest);
        let err = strict.diagnose(Uuid::new_v4(), &recording(440.0), None).unwrap_err();
        assert!(matches!(err, PipelineError::ModelInference(_)));
        assert!(dir_is_empty(dir.path()));

        let fallback = pipeline(
            dir.path(),
            FixedClassifier::new(99),
            LabelPolicy::TirednessFallback,
            SlotMode::PerRequest,
        );
        let report = fallback.diagnose(Uuid::new_v4(), &recording(440.0), None).unwrap();
        assert_eq!(report.diagnosis, Diagnosis::Tiredness);
        assert_eq!(report.class_index, ClassIndex(99));
    }

    #[test]
    fn test_empty_upload_never_reaches_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let stub = FixedClassifier::new(0);
        let p = pipeline(dir.path(), stub.clone(), LabelPolicy::Strict, SlotMode::PerRequest);

        let err = p.diagnose(Uuid::new_v4(), &[], Some("webm")).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(err.is_recoverable());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_stages_are_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), Arc::new(SpectralClassifier), LabelPolicy::Strict, SlotMode::PerRequest);
        let upload = recording(330.0);

        let run = || {
            let slot = p.store().slot(Uuid::new_v4());
            let waveform = p.normalize(&upload, Some("audio/wav"), &slot).unwrap();
            let bytes = std::fs::read(&waveform.path).unwrap();
            let features = p.extract_features(&waveform.path).unwrap();
            let classification = p.classify(&features).unwrap();
            (bytes, features, classification)
        };

        let (bytes_a, features_a, class_a) = run();
        let (bytes_b, features_b, class_b) = run();
        assert_eq!(bytes_a, bytes_b);
        assert_eq!(features_a.len(), FEATURE_DIM);
        let bits = |f: &FeatureVector| f.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&features_a), bits(&features_b));
        assert_eq!(class_a, class_b);
    }

    #[test]
    fn test_shared_slot_runs_do_not_interfere() {
        let dir = tempfile::tempdir().unwrap();
        let p = Arc::new(pipeline(
            dir.path(),
            Arc::new(SpectralClassifier),
            LabelPolicy::Strict,
            SlotMode::Shared,
        ));
        let freqs = [220.0, 440.0, 880.0, 1760.0, 3520.0, 5000.0];

        let sequential: Vec<ClassIndex> = freqs
            .iter()
            .map(|&f| p.diagnose(Uuid::new_v4(), &recording(f), None).unwrap().class_index)
            .collect();

        let handles: Vec<_> = freqs
            .iter()
            .map(|&f| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    p.diagnose(Uuid::new_v4(), &recording(f), None).unwrap().class_index
                })
            })
            .collect();
        let concurrent: Vec<ClassIndex> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(sequential, concurrent);
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_retained_waveforms_stay_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let p = DiagnosisPipeline::new(
            WaveformStore::open(dir.path(), SlotMode::PerRequest).unwrap(),
            MfccExtractor::new(MfccConfig::default()),
            FixedClassifier::new(2),
            LabelPolicy::Strict,
            true,
            "stub",
        )
        .unwrap();

        let report = p.diagnose(Uuid::new_v4(), &recording(440.0), None).unwrap();
        assert!(report.waveform.path.exists());
        assert!(!p.store().slot(report.recording_id).upload_path.exists());
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_at_build() {
        let dir = tempfile::tempdir().unwrap();
        let result = DiagnosisPipeline::new(
            WaveformStore::open(dir.path(), SlotMode::PerRequest).unwrap(),
            MfccExtractor::new(MfccConfig {
                n_mfcc: 13,
                ..MfccConfig::default()
            }),
            FixedClassifier::new(0),
            LabelPolicy::Strict,
            false,
            "stub",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_overlong_recording_never_reaches_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let stub = FixedClassifier::new(0);
        let p = pipeline(dir.path(), stub.clone(), LabelPolicy::Strict, SlotMode::PerRequest)
            .with_max_duration(Duration::from_millis(500));

        let err = p.diagnose(Uuid::new_v4(), &recording(440.0), Some("wav")).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
        assert!(dir_is_empty(dir.path()));
    }
}
