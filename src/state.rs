//! # Application State
//!
//! Shared state handed to every HTTP handler through `web::Data`.
//!
//! ## Sharing Pattern:
//! - **config**: `Arc<AppConfig>`, read-only after startup
//! - **pipeline**: `Arc<DiagnosisPipeline>`, read-only after startup; runs are
//!   independent, so no lock is needed to use it
//! - **metrics**: `Arc<RwLock<AppMetrics>>`, written by middleware and the
//!   diagnose handler on every request, read by the metrics endpoint
//!
//! Metrics locks are held only for a counter update or a snapshot copy, never
//! across a pipeline run or an await point.

use crate::classifier::Diagnosis;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::pipeline::DiagnosisPipeline;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<DiagnosisPipeline>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected since startup.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// Every HTTP request, whatever the outcome
    pub request_count: u64,

    /// Requests answered with a 4xx or 5xx status
    pub error_count: u64,

    /// Pipeline runs currently executing on blocking workers
    pub in_flight_diagnoses: u32,

    /// Per route pattern, e.g. "POST /api/v1/diagnose"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    /// Successful diagnoses per label
    pub diagnosis_counts: HashMap<String, u64>,

    /// Decode and feature extraction failures (user asked to re-record)
    pub recoverable_failures: u64,

    /// I/O and model failures
    pub fatal_failures: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: DiagnosisPipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    // Counters stay usable even if a handler panicked while holding the lock
    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn begin_diagnosis(&self) {
        self.metrics_mut().in_flight_diagnoses += 1;
    }

    /// Close a run opened with [`AppState::begin_diagnosis`] and record its outcome.
    pub fn finish_diagnosis(&self, outcome: Result<Diagnosis, &PipelineError>) {
        let mut metrics = self.metrics_mut();
        metrics.in_flight_diagnoses = metrics.in_flight_diagnoses.saturating_sub(1);
        match outcome {
            Ok(diagnosis) => {
                *metrics
                    .diagnosis_counts
                    .entry(diagnosis.label().to_string())
                    .or_default() += 1;
            }
            Err(e) if e.is_recoverable() => metrics.recoverable_failures += 1,
            Err(_) => metrics.fatal_failures += 1,
        }
    }

    /// Close a run whose worker never returned (panicked or was cancelled).
    pub fn abort_diagnosis(&self) {
        let mut metrics = self.metrics_mut();
        metrics.in_flight_diagnoses = metrics.in_flight_diagnoses.saturating_sub(1);
        metrics.fatal_failures += 1;
    }

    /// Copy of the current counters, taken under a short read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_state;
    use super::*;
    use crate::classifier::LabelPolicy;

    #[test]
    fn test_endpoint_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 0, LabelPolicy::Strict);

        state.record_endpoint_request("GET /health", 4, false);
        state.record_endpoint_request("GET /health", 6, true);
        let snapshot = state.get_metrics_snapshot();
        let health = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 5.0);
        assert_eq!(health.error_rate(), 0.5);
    }

    #[test]
    fn test_diagnosis_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 0, LabelPolicy::Strict);

        state.begin_diagnosis();
        state.begin_diagnosis();
        state.begin_diagnosis();
        assert_eq!(state.get_metrics_snapshot().in_flight_diagnoses, 3);

        state.finish_diagnosis(Ok(Diagnosis::Hunger));
        state.finish_diagnosis(Err(&PipelineError::Decode("empty".into())));
        state.finish_diagnosis(Err(&PipelineError::ModelInference("shape".into())));

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.in_flight_diagnoses, 0);
        assert_eq!(snapshot.diagnosis_counts["hunger"], 1);
        assert_eq!(snapshot.recoverable_failures, 1);
        assert_eq!(snapshot.fatal_failures, 1);
    }
}
