use crate::classifier::Diagnosis;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/labels`: the class table and the unknown-index policy.
pub async fn list_labels(state: web::Data<AppState>) -> HttpResponse {
    let labels: Vec<_> = Diagnosis::ALL
        .iter()
        .map(|d| {
            json!({
                "class_index": d.index(),
                "label": d.label(),
                "message": d.message()
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "labels": labels,
        "policy": state.pipeline.policy(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
