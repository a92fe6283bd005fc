//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **PipelineError**: failures of the audio → features → label pipeline. These are
//!   plain library errors with no knowledge of HTTP.
//! - **AppError**: errors returned by HTTP handlers. They know how to render themselves
//!   as JSON responses with the right status code.
//!
//! ## Pipeline Error Kinds:
//! - **Decode**: the upload is not audio in any supported codec. The user can re-record.
//! - **Io**: a staged upload, canonical waveform or model file could not be read/written.
//! - **FeatureExtraction**: the canonical waveform is empty or unreadable. The user can re-record.
//! - **ModelInference**: the model rejected its input or produced an unknown class.
//!   This points at an integration defect and is logged loudly.
//!
//! None of these crash the process; they are local to a single request.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;

/// Errors produced by the diagnosis pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raw bytes could not be parsed as audio by any supported codec
    #[error("could not decode audio: {0}")]
    Decode(String),

    /// Filesystem failure while staging, writing or reading audio or model files
    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The canonical waveform is empty, corrupt or not PCM
    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    /// The model rejected the feature vector or returned an unmapped class
    #[error("model inference failed: {0}")]
    ModelInference(String),
}

impl PipelineError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Recoverable errors are the ones a user fixes by recording again.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_) | PipelineError::FeatureExtraction(_)
        )
    }

    /// Short machine-readable name used in logs, metrics and JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode_error",
            PipelineError::Io { .. } => "io_error",
            PipelineError::FeatureExtraction(_) => "feature_extraction_error",
            PipelineError::ModelInference(_) => "model_inference_error",
        }
    }
}

/// Shorthand for pipeline results.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors returned from HTTP handlers.
///
/// ## Status Code Mapping:
/// - **Internal** → 500
/// - **BadRequest** → 400
/// - **PayloadTooLarge** → 413
/// - **Unprocessable** → 422 (audio we could not make sense of, "please re-record")
#[derive(Debug)]
pub enum AppError {
    /// Server-side failure; the message shown to clients stays generic
    Internal(String),

    /// Client sent malformed data
    BadRequest(String),

    /// Upload exceeded the configured size limit
    PayloadTooLarge(String),

    /// Audio was received but could not be decoded or analysed
    Unprocessable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::Unprocessable(msg) => write!(f, "Unprocessable audio: {}", msg),
        }
    }
}

/// Renders errors as:
///
/// ```json
/// {
///   "error": {
///     "type": "unprocessable_audio",
///     "message": "We could not analyse this recording, please record again",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Something went wrong while processing the recording".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg.clone())
            }
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable_audio",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Pipeline failures become HTTP errors here.
///
/// Recoverable kinds ask the user to record again; everything else is an
/// internal error whose details only go to the log.
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Decode(_) | PipelineError::FeatureExtraction(_) => AppError::Unprocessable(
                "We could not analyse this recording, please record again".to_string(),
            ),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
