use actix_web::web;
use dau_gateway_core::forwarding::DatasetProgress;
use dau_gateway_error::WebResult;
use dau_gateway_models::web::WebResponse;
use std::sync::Arc;

use crate::AppState;

pub(super) const ROUTER_PREFIX: &str = "/archive";

pub(crate) fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/datasets", web::get().to(datasets));
}

/// Datasets still being streamed to the archive.
pub async fn datasets(
    state: web::Data<Arc<AppState>>,
) -> WebResult<WebResponse<Vec<DatasetProgress>>> {
    Ok(WebResponse::ok(state.facade.active_datasets()))
}
