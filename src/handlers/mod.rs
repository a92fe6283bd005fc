pub mod config;
pub mod diagnose;
pub mod labels;

pub use self::config::*;
pub use self::diagnose::*;
pub use self::labels::*;

use crate::health;
use actix_web::web;

/// Every route the service exposes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/diagnose", web::post().to(diagnose))
            .route("/labels", web::get().to(list_labels))
            .route("/config", web::get().to(get_config))
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics)),
    )
    // Also at root level for load balancers
    .route("/health", web::get().to(health::health_check));
}
