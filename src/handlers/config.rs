use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration.
///
/// Read-only. The pipeline is built from this at startup, so changing it
/// means restarting the service.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = serde_json::to_value(state.config.as_ref())
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config,
        "model": state.pipeline.model()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LabelPolicy;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), 0, LabelPolicy::Strict);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["features"]["n_mfcc"], 40);
        assert_eq!(body["config"]["storage"]["slot_mode"], "per_request");
        assert_eq!(body["config"]["labels"]["policy"], "strict");
        assert_eq!(body["model"]["input_dim"], 40);
    }
}
