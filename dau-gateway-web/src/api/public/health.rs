use actix_web::{web, HttpResponse};

pub fn configure_health_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health));
}

/// Liveness of the process; does not touch any device.
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}
