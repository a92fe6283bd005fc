//! # Diagnose Endpoint
//!
//! `POST /api/v1/diagnose` takes one recording as multipart form data and
//! answers with the diagnosis.
//!
//! ## Request:
//! Multipart form with the recording in a field named `audio_data` (or
//! `audio`). The part's filename extension or content type is passed to the
//! decoder as a format hint; browsers usually send `recording.webm` or
//! `audio/wav`.
//!
//! ## Response:
//! ```json
//! {
//!   "recording_id": "3f0c8a52-8f0e-4a0f-9d55-0c1f3c2b7a10",
//!   "label": "hunger",
//!   "message": "The pain is caused by hunger.",
//!   "class_index": 2,
//!   "audio": { "sample_rate": 44100, "channels": 1, "frames": 220500, "duration_ms": 5000 },
//!   "processing_time_ms": 84,
//!   "timestamp": "2025-01-01T12:00:00Z"
//! }
//! ```
//!
//! Recordings we cannot decode or analyse get a 422 asking for a new recording.

use crate::error::{AppError, AppResult};
use crate::middleware::RequestId;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Form fields that may carry the recording.
const AUDIO_FIELDS: [&str; 2] = ["audio_data", "audio"];

struct Upload {
    bytes: Vec<u8>,
    format_hint: Option<String>,
}

pub async fn diagnose(
    state: web::Data<AppState>,
    request_id: RequestId,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let upload = read_upload(&mut payload, state.config.limits.max_upload_bytes).await?;
    debug!(
        recording_id = %request_id.0,
        bytes = upload.bytes.len(),
        format_hint = ?upload.format_hint,
        "recording received"
    );

    let pipeline = Arc::clone(&state.pipeline);
    let id = request_id.0;
    state.begin_diagnosis();
    let outcome = web::block(move || {
        pipeline.diagnose(id, &upload.bytes, upload.format_hint.as_deref())
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => {
            state.finish_diagnosis(Ok(report.diagnosis));
            report
        }
        Ok(Err(e)) => {
            state.finish_diagnosis(Err(&e));
            return Err(e.into());
        }
        Err(e) => {
            state.abort_diagnosis();
            error!(recording_id = %id, error = %e, "diagnosis worker did not finish");
            return Err(AppError::Internal(e.to_string()));
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "recording_id": report.recording_id,
        "label": report.diagnosis.label(),
        "message": report.diagnosis.message(),
        "class_index": report.class_index,
        "audio": {
            "sample_rate": report.waveform.sample_rate,
            "channels": report.waveform.channels,
            "frames": report.waveform.frames,
            "duration_ms": report.waveform.duration_ms()
        },
        "processing_time_ms": report.processing_time_ms,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Pull the recording out of the form, enforcing the size limit while streaming.
async fn read_upload(payload: &mut Multipart, limit: usize) -> AppResult<Upload> {
    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_string),
                cd.get_filename().map(str::to_string),
            ),
            None => (None, None),
        };
        if !name.as_deref().is_some_and(|n| AUDIO_FIELDS.contains(&n)) {
            continue;
        }

        let format_hint = filename
            .as_deref()
            .and_then(|f| Path::new(f).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_string)
            .or_else(|| field.content_type().map(|mime| mime.to_string()));

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > limit {
                return Err(AppError::PayloadTooLarge(format!(
                    "Recording exceeds the {} byte limit",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(Upload { bytes, format_hint });
    }

    Err(AppError::BadRequest(
        "No recording provided; send it in the 'audio_data' form field".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fixtures;
    use crate::classifier::LabelPolicy;
    use crate::state::test_support::test_state;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};

    const BOUNDARY: &str = "cry-test-boundary";

    fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY,
            field = field,
            filename = filename
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn post(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/v1/diagnose")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    fn wav_recording() -> Vec<u8> {
        let pcm = fixtures::to_pcm16(&fixtures::sine(440.0, 0.5, 16000, 0.5));
        fixtures::wav_bytes_16(&pcm, 16000, 1)
    }

    #[actix_web::test]
    async fn test_diagnose_returns_label() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 2, LabelPolicy::Strict);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::handlers::configure),
        )
        .await;

        let req = post(multipart_body("audio_data", "cry.wav", &wav_recording()));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["label"], "hunger");
        assert_eq!(body["message"], "The pain is caused by hunger.");
        assert_eq!(body["class_index"], 2);
        assert_eq!(body["audio"]["sample_rate"], 16000);
        assert_eq!(state.get_metrics_snapshot().diagnosis_counts["hunger"], 1);
    }

    #[actix_web::test]
    async fn test_empty_recording_asks_for_rerecord() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 2, LabelPolicy::Strict);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(crate::handlers::configure),
        )
        .await;

        let req = post(multipart_body("audio", "recording.webm", &[]));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(state.get_metrics_snapshot().recoverable_failures, 1);
    }

    #[actix_web::test]
    async fn test_unknown_class_is_internal_error_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 99, LabelPolicy::Strict);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::handlers::configure),
        )
        .await;

        let req = post(multipart_body("audio_data", "cry.wav", &wav_recording()));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_missing_field_and_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = test_state(dir.path(), 0, LabelPolicy::Strict);
        let mut config = (*state.config).clone();
        config.limits.max_upload_bytes = 1024;
        state.config = Arc::new(config);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(crate::handlers::configure),
        )
        .await;

        let req = post(multipart_body("notes", "a.txt", b"hello"));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = post(multipart_body("audio_data", "cry.wav", &wav_recording()));
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
